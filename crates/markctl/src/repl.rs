//! REPL - the conversational grading interface
//!
//! Interactive read-eval-print loop: one utterance is fully classified,
//! routed, and handled before the next is read. All external calls are
//! blocking, so a turn finishes or fails before the prompt returns.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use console::style;
use mark_common::canvas::LmsGateway;
use mark_common::llm::LlmClient;

use crate::dispatch::{Dispatcher, Turn};
use crate::intent_router::classify_with_llm;
use crate::logging::TurnEntry;
use crate::session::SessionState;

fn print_welcome() {
    println!();
    println!("{}", style("Mark - AI grading assistant").bold());
    println!("Tell me a course and assignment to see its rubric, e.g. '121,473'.");
    println!("Add a student ID to fetch a submission, e.g. '121,473,247'.");
    println!("Type 'exit' to leave.");
    println!();
}

fn print_prompt() {
    print!("{} ", style("mark>").cyan().bold());
    let _ = io::stdout().flush();
}

/// Run the chat loop until EOF or an exit intent
pub fn run(gateway: &dyn LmsGateway, llm: &dyn LlmClient) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(gateway, llm);
    let mut session = SessionState::new();

    print_welcome();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print_prompt();

        let input = match lines.next() {
            Some(Ok(line)) => line.trim().to_string(),
            Some(Err(e)) => {
                eprintln!("Error reading input: {}", e);
                continue;
            }
            None => break, // EOF
        };

        if input.is_empty() {
            continue;
        }

        let started = Instant::now();
        let intent = classify_with_llm(llm, &input);
        let label = intent.label();

        let turn = dispatcher.route(intent, &mut session);
        let duration_ms = started.elapsed().as_millis() as u64;

        TurnEntry::new(
            label,
            session.last_error.is_none(),
            duration_ms,
            session.error_count,
            session.last_error.clone(),
        )
        .write();

        match turn {
            Turn::Reply(reply) => {
                println!("{}", reply);
                println!();
            }
            Turn::Exit => {
                println!("Goodbye! Your pending grades stay in this session only.");
                println!();
                break;
            }
        }
    }

    Ok(())
}
