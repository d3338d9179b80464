//! readmatrix-chat - terminal client for the readmatrix notes assistant
//!
//! Restores the last conversation, then reads questions and commands from
//! stdin and prints answers as they stream in.

use readmatrix_chat::{
    citation_markers, AskFilters, ChatSession, ClientConfig, HttpAnswerService, IdentityStore,
    LoggingAnswerService, Message, Role, SessionSnapshot,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Session<S> = ChatSession<LoggingAnswerService<HttpAnswerService>, S>;

const HELP: &str = "\
Commands:
  /new           start a new conversation
  /sources       list the citations in view
  /cite N        select citation [N]
  /show N        focus message N
  /book TITLE    only search this book (/book alone clears it)
  /history       print the conversation
  /quit          exit
Anything else is sent as a question.";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Ask(&'a str),
    New,
    Sources,
    Cite(u32),
    Show(usize),
    Book(Option<&'a str>),
    History,
    Help,
    Quit,
    Invalid(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Ask(line);
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(name, arg)| (name, arg.trim()));

        match (name, arg) {
            ("new", "") => Command::New,
            ("sources", "") => Command::Sources,
            ("history", "") => Command::History,
            ("help", "") => Command::Help,
            ("quit" | "exit", "") => Command::Quit,
            ("book", "") => Command::Book(None),
            ("book", title) => Command::Book(Some(title)),
            ("cite", n) => n.parse().map_or(Command::Invalid("usage: /cite N"), Command::Cite),
            ("show", n) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Command::Show(n),
                _ => Command::Invalid("usage: /show N (1-based)"),
            },
            _ => Command::Invalid("unknown command, try /help"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "readmatrix_chat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        api_url = %config.api_url,
        state_dir = %config.state_dir.display(),
        "Starting readmatrix chat"
    );

    let remote = HttpAnswerService::new(&config.api_url, config.connect_timeout)?;
    let session = ChatSession::new(
        Arc::new(LoggingAnswerService::new(remote)),
        config.identity_store(),
        config.session_options(),
    );

    if let Err(e) = session.restore().await {
        println!("Could not load the previous conversation: {e}");
    }
    print_history(&session.snapshot());
    println!("{HELP}");

    let mut filters = AskFilters::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&filters);
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match Command::parse(&line) {
            Command::Ask("") => {}
            Command::Ask(query) => ask(&session, query, filters.clone()).await,
            Command::New => match session.start_new_conversation().await {
                Ok(id) => println!("Started conversation {id}"),
                Err(e) => println!("Could not start a new conversation: {e}"),
            },
            Command::Sources => print_sources(&session.snapshot()),
            Command::Cite(marker) => {
                if session.select_marker(marker) {
                    print_selected(&session.snapshot());
                } else {
                    println!("No citation [{marker}] in view");
                }
            }
            Command::Show(n) => {
                if session.handle_message_click(n - 1) {
                    let snapshot = session.snapshot();
                    if let Some(message) = snapshot.timeline.get(n - 1) {
                        print_message(n, message);
                    }
                    print_sources(&snapshot);
                } else {
                    println!("No message {n}");
                }
            }
            Command::Book(title) => {
                filters = title.map(AskFilters::book_title).unwrap_or_default();
            }
            Command::History => print_history(&session.snapshot()),
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Invalid(usage) => println!("{usage}"),
        }
    }

    Ok(())
}

/// Submit one question, echoing the answer as it grows
async fn ask<S: IdentityStore>(session: &Session<S>, query: &str, filters: AskFilters) {
    let answer_index = session.snapshot().timeline.len() + 1;
    let mut updates = session.subscribe();
    let mut printed = 0;

    let turn = session.submit(query, filters);
    tokio::pin!(turn);
    let result = loop {
        tokio::select! {
            biased;

            result = &mut turn => break result,
            Ok(()) = updates.changed() => {
                let snapshot = updates.borrow_and_update().clone();
                print_fresh(&snapshot, answer_index, &mut printed);
            }
        }
    };

    let snapshot = session.snapshot();
    match result {
        Ok(()) => {
            print_fresh(&snapshot, answer_index, &mut printed);
            println!();
            if let Some(answer) = snapshot.timeline.get(answer_index) {
                if answer.has_citations() {
                    println!("({} sources, /sources to list)", answer.citations.len());
                }
            }
        }
        Err(e) => {
            if printed > 0 {
                println!();
            }
            match snapshot.timeline.get(answer_index) {
                Some(answer) if answer.is_assistant() => println!("{}", answer.content),
                _ => println!("{e}"),
            }
        }
    }
}

/// Print whatever the answer gained since the last call
fn print_fresh(snapshot: &SessionSnapshot, index: usize, printed: &mut usize) {
    let Some(answer) = snapshot.timeline.get(index) else {
        return;
    };
    if let Some(fresh) = answer.content.get(*printed..) {
        print!("{fresh}");
        *printed = answer.content.len();
        let _ = std::io::stdout().flush();
    }
}

fn prompt(filters: &AskFilters) {
    match &filters.book_title {
        Some(title) => print!("[{title}] > "),
        None => print!("> "),
    }
    let _ = std::io::stdout().flush();
}

fn print_history(snapshot: &SessionSnapshot) {
    if snapshot.timeline.is_empty() {
        println!("No conversation yet.");
        return;
    }
    for (i, message) in snapshot.timeline.messages().iter().enumerate() {
        print_message(i + 1, message);
    }
}

fn print_message(n: usize, message: &Message) {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant if message.is_clarification => "assistant (asking)",
        Role::Assistant => "assistant",
    };
    println!("{n}. {speaker}: {}", message.content);

    let markers = citation_markers(&message.content);
    if message.has_citations() && !markers.is_empty() {
        let refs: Vec<String> = markers.iter().map(|k| format!("[{k}]")).collect();
        println!("   cites {}", refs.join(" "));
    }
}

fn print_sources(snapshot: &SessionSnapshot) {
    let current = snapshot.current_citations();
    if current.is_empty() {
        println!("No citations in view.");
        return;
    }
    let selected = snapshot.selected_citation().map(|c| c.id);
    for citation in current {
        let mark = if Some(citation.id) == selected { '*' } else { ' ' };
        println!("{mark} [{}] {}", citation.id, citation.label());
    }
}

fn print_selected(snapshot: &SessionSnapshot) {
    let Some(citation) = snapshot.selected_citation() else {
        return;
    };
    println!("[{}] {}", citation.id, citation.label());
    if let Some(author) = &citation.author {
        println!("    by {author}");
    }
    if !citation.snippet.is_empty() {
        println!("    \"{}\"", citation.snippet);
    }
    if let Some(uri) = &citation.obsidian_uri {
        println!("    {uri}");
    } else if !citation.source_path.is_empty() {
        println!("    {}", citation.source_path);
    }
}
