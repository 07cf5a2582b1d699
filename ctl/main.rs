#![forbid(unsafe_code)]

//! `interactive-agent-ctl` is the local CLI companion for `interactive-agent`.
//!
//! Connects to the IPC socket, evaluates one snippet or file in a fresh
//! context, prints the streamed cell events, and tears the context down.
//! An optional deadline issues `abort` when the cell runs too long.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use interactive_agent::models::cell::EvaluationStatus;
use interactive_agent::models::event::CodeCellEvent;
use interactive_agent::session::{ClientRequest, ClientResponse, ServerMessage};

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "interactive-agent-ctl",
    about = "Local CLI for interactive-agent",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name` config).
    #[arg(long, default_value = "interactive-agent")]
    ipc_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate code in a fresh context and stream its events.
    Eval {
        /// File containing the code to evaluate.
        #[arg(conflicts_with = "code", required_unless_present = "code")]
        file: Option<PathBuf>,

        /// Inline code to evaluate.
        #[arg(long)]
        code: Option<String>,

        /// Target runtime requested for the context.
        #[arg(long)]
        target_runtime: Option<String>,

        /// Abort the cell if it has not finished after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(&args)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            eprintln!(
                "Is interactive-agent running with ipc_name '{}'?",
                args.ipc_name
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Cli) -> CtlResult<ExitCode> {
    let Command::Eval {
        file,
        code,
        target_runtime,
        timeout_ms,
    } = &args.command;

    let source = match (file, code) {
        (Some(path), _) => std::fs::read_to_string(path)?,
        (None, Some(code)) => code.clone(),
        (None, None) => return Err("either a file or --code is required".into()),
    };

    let name = args.ipc_name.clone().to_ns_name::<GenericNamespaced>()?;
    let stream = interprocess::local_socket::tokio::Stream::connect(name).await?;
    let mut conn = Connection::new(stream);

    let created = conn
        .call(
            "create_context",
            json!({ "configuration": { "targetRuntime": target_runtime } }),
        )
        .await?;
    let context_id = created
        .get("evaluationContextId")
        .cloned()
        .ok_or("create_context reply is missing evaluationContextId")?;

    let submitted = conn
        .call(
            "evaluate",
            json!({ "evaluationContextId": context_id, "source": source }),
        )
        .await?;
    if submitted.get("isSubmissionComplete") != Some(&Value::Bool(true)) {
        eprintln!("Submission is incomplete; nothing was evaluated.");
        conn.call("destroy_context", json!({ "evaluationContextId": context_id }))
            .await?;
        return Ok(ExitCode::from(2));
    }

    let deadline = timeout_ms.map(Duration::from_millis);
    let status = conn.follow_cell(&context_id, deadline).await?;

    conn.call("destroy_context", json!({ "evaluationContextId": context_id }))
        .await?;

    eprintln!("Finished: {status:?}");
    Ok(if status == EvaluationStatus::Success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

struct Connection {
    reader: BufReader<interprocess::local_socket::tokio::RecvHalf>,
    writer: interprocess::local_socket::tokio::SendHalf,
    // Survives a cancelled read so a partial line is not lost.
    line: String,
    next_id: u64,
}

impl Connection {
    fn new(stream: interprocess::local_socket::tokio::Stream) -> Self {
        let (reader, writer) = stream.split();
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
            next_id: 1,
        }
    }

    async fn send(&mut self, method: &str, params: Value) -> CtlResult<u64> {
        let id = self.next_id;
        self.next_id += 1;
        let mut line = serde_json::to_string(&ClientRequest::new(id, method, params))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(id)
    }

    async fn next_message(&mut self) -> CtlResult<ServerMessage> {
        loop {
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Err("server closed the connection".into());
            }
            let line = std::mem::take(&mut self.line);
            if !line.trim().is_empty() {
                return Ok(serde_json::from_str(line.trim())?);
            }
        }
    }

    /// Send a request and wait for its response, printing events seen meanwhile.
    async fn call(&mut self, method: &str, params: Value) -> CtlResult<Value> {
        let id = self.send(method, params).await?;
        loop {
            match self.next_message().await? {
                ServerMessage::Event(msg) => print_event(&msg.event),
                ServerMessage::Response(response) if response.id == Some(id) => {
                    return into_data(method, response);
                }
                ServerMessage::Response(_) => {}
            }
        }
    }

    /// Print events until the evaluating cell finishes.
    async fn follow_cell(
        &mut self,
        context_id: &Value,
        deadline: Option<Duration>,
    ) -> CtlResult<EvaluationStatus> {
        let sleep = tokio::time::sleep(deadline.unwrap_or_default());
        tokio::pin!(sleep);
        let mut abort_sent = deadline.is_none();

        loop {
            let message = tokio::select! {
                () = &mut sleep, if !abort_sent => {
                    abort_sent = true;
                    eprintln!("Deadline reached; aborting.");
                    self.send("abort", json!({ "evaluationContextId": context_id })).await?;
                    continue;
                }
                message = self.next_message() => message?,
            };

            match message {
                ServerMessage::Event(msg) => {
                    print_event(&msg.event);
                    if let CodeCellEvent::EvaluationFinished { status, .. } = msg.event {
                        return Ok(status);
                    }
                }
                ServerMessage::Response(response) if !response.ok => {
                    into_data("abort", response)?;
                }
                ServerMessage::Response(_) => {}
            }
        }
    }
}

fn into_data(method: &str, response: ClientResponse) -> CtlResult<Value> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    let message = response.error.map_or_else(
        || "unknown error".to_owned(),
        |e| format!("{}: {}", e.kind, e.message),
    );
    Err(format!("{method} failed: {message}").into())
}

fn print_event(event: &CodeCellEvent) {
    match event {
        CodeCellEvent::EvaluationStarted { .. } => {}
        CodeCellEvent::Result {
            type_name,
            value_representations,
            ..
        } => {
            let values = value_representations.clone().unwrap_or_default();
            let rendered = values
                .first()
                .map(Value::to_string)
                .unwrap_or_default();
            match type_name {
                Some(ty) => println!("{rendered} : {ty}"),
                None => println!("{rendered}"),
            }
        }
        CodeCellEvent::CapturedOutputSegment {
            file_descriptor,
            value,
            ..
        } => {
            if *file_descriptor == 2 {
                eprint!("{value}");
            } else {
                print!("{value}");
            }
        }
        CodeCellEvent::EvaluationFinished { diagnostics, .. } => {
            for diagnostic in diagnostics {
                eprintln!(
                    "{} {:?} at {}: {}",
                    diagnostic.id,
                    diagnostic.severity,
                    diagnostic.span.span.start(),
                    diagnostic.message
                );
            }
        }
    }
}
