//! Mark - AI grading assistant for Canvas
//!
//! Chat with the assistant to preview rubrics, fetch and grade student
//! submissions, adjust the result, and post it back to Canvas.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mark_common::canvas::{CanvasClient, LmsGateway};
use mark_common::config::MarkConfig;
use mark_common::llm::{HttpLlmClient, LlmClient};

use markctl::dispatch::Dispatcher;
use markctl::intent_router::Intent;
use markctl::session::SessionState;

#[derive(Parser)]
#[command(name = "markctl")]
#[command(about = "Mark - conversational AI grading assistant for Canvas", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive grading chat (default)
    Chat,

    /// Preview the rubric for one assignment
    Rubric {
        course_id: String,
        assignment_id: String,
    },

    /// Fetch, grade, and submit one student's assignment in a single pass
    Grade {
        course_id: String,
        assignment_id: String,
        student_id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MarkConfig::load(cli.config.as_deref())?;

    let gateway = CanvasClient::new(config.canvas.clone())?;
    let llm = HttpLlmClient::new(config.llm.clone())?;

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => markctl::repl::run(&gateway, &llm),
        Commands::Rubric {
            course_id,
            assignment_id,
        } => one_shot(
            &gateway,
            &llm,
            vec![Intent::ViewRubric {
                course_id: Some(course_id),
                assignment_id: Some(assignment_id),
            }],
        ),
        Commands::Grade {
            course_id,
            assignment_id,
            student_id,
        } => one_shot(
            &gateway,
            &llm,
            vec![
                Intent::GradeSubmission {
                    course_id: Some(course_id),
                    assignment_id: Some(assignment_id),
                    student_id: Some(student_id),
                },
                Intent::SubmitGrade,
            ],
        ),
    }
}

/// Run a fixed intent sequence against a fresh session and print each
/// reply. Used by the non-interactive subcommands.
fn one_shot(gateway: &dyn LmsGateway, llm: &dyn LlmClient, intents: Vec<Intent>) -> Result<()> {
    let dispatcher = Dispatcher::new(gateway, llm);
    let mut session = SessionState::new();

    for intent in intents {
        let turn = dispatcher.route(intent, &mut session);
        println!("{}", turn.reply_text());
        println!();

        if session.last_error.is_some() {
            anyhow::bail!(
                "stopping: {}",
                session.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}
