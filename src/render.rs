// src/render.rs

//! Render a DAG as Mermaid, DOT, or a Markdown-fenced Mermaid block.

use std::fmt::Write;

use anyhow::Result;
use clap::ValueEnum;

use crate::dag::Dag;

/// Output format for `render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Markdown,
    Mermaid,
    Dot,
}

/// Render `dag` in the requested format.
pub fn render(dag: &Dag, format: Format, out: &mut impl Write) -> Result<()> {
    match format {
        Format::Markdown => render_markdown(dag, out),
        Format::Mermaid => render_mermaid(dag, out),
        Format::Dot => render_dot(dag, out),
    }
}

fn render_mermaid(dag: &Dag, out: &mut impl Write) -> Result<()> {
    writeln!(out, "graph LR")?;
    for task in dag.all_tasks() {
        writeln!(out, "    {}(\"{}\")", mermaid_id(task.id()), task.id())?;
    }
    writeln!(out)?;
    dag.walk_dependencies(|ancestor, descendant| {
        writeln!(
            out,
            "    {}-->{}",
            mermaid_id(ancestor.id()),
            mermaid_id(descendant.id())
        )?;
        Ok(())
    })?;
    Ok(())
}

fn render_markdown(dag: &Dag, out: &mut impl Write) -> Result<()> {
    writeln!(out, "```mermaid")?;
    render_mermaid(dag, out)?;
    writeln!(out, "```")?;
    Ok(())
}

fn render_dot(dag: &Dag, out: &mut impl Write) -> Result<()> {
    writeln!(out, "digraph {} {{", dag.id())?;
    for task in dag.all_tasks() {
        writeln!(
            out,
            "    {} [ shape=\"ellipse\", style=\"filled\" ];",
            task.id()
        )?;
    }
    dag.walk_dependencies(|ancestor, descendant| {
        writeln!(
            out,
            "    {} -> {} [ arrowhead=\"vee\" ];",
            ancestor.id(),
            descendant.id()
        )?;
        Ok(())
    })?;
    writeln!(out, "}}")?;
    Ok(())
}

/// Mermaid node ids must not contain spaces or dashes.
fn mermaid_id(id: &str) -> String {
    id.replace([' ', '-'], "_")
}
