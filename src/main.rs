//! Waypoint 无界面 REPL
//!
//! 入口：初始化日志与配置，用回显模型跑一个会话。普通输入作为查询（`run <cmd>` 触发 shell 工具），
//! `/history` 查看 transcript，`/rollback <message-id>` 回滚，`/cancel` 中断当前查询，`/quit` 退出。
//! 工具需要授权时输入 y / n 作答。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use waypoint::config::{load_config, AppConfig};
use waypoint::core::{AgentError, AgentEvent, RunOutcome, SessionHandle};
use waypoint::llm::EchoModel;
use waypoint::permission::{ChannelPrompt, PermissionRequest};
use waypoint::{observability, Agent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AppConfig::default()
    });

    let (prompt, mut permission_rx) = ChannelPrompt::channel(4);
    let agent = Arc::new(
        Agent::builder(Arc::new(EchoModel))
            .config(cfg)
            .permission_prompt(Arc::new(prompt))
            .build()
            .context("Failed to build agent")?,
    );
    let env = agent.local_environment().context("Failed to prepare workspace")?;
    let session = agent.open_session(Arc::new(env));
    println!("session {} ready. Type a message, /history, /rollback <id>, /cancel or /quit.", session.id());

    let mut events = agent.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let (done_tx, mut done) = mpsc::channel::<Result<RunOutcome, AgentError>>(1);
    let mut running = false;
    let mut pending_permission: Option<PermissionRequest> = None;

    loop {
        tokio::select! {
            Some(req) = permission_rx.recv() => {
                println!("allow tool '{}' with {}? [y/n]", req.tool, req.args);
                pending_permission = Some(req);
            }
            Some(result) = done.recv() => {
                running = false;
                match result {
                    Ok(outcome) => println!("[{:?}] {}", outcome.state, outcome.response.unwrap_or_default()),
                    Err(e) => println!("error: {e}"),
                }
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                let line = line.trim().to_string();
                if let Some(req) = pending_permission.take() {
                    if line.eq_ignore_ascii_case("y") { req.grant() } else { req.deny() }
                    continue;
                }
                match line.as_str() {
                    "" => {}
                    "/quit" => break,
                    "/cancel" => session.cancel(),
                    "/history" => print_history(&session),
                    _ if line.starts_with("/rollback ") => {
                        let id = line.trim_start_matches("/rollback ").trim().to_string();
                        let agent = agent.clone();
                        let session = session.clone();
                        tokio::spawn(async move {
                            match agent.rollback(&session, &id).await {
                                Ok(report) => println!("rolled back: removed {} message(s), commit {:?}", report.removed, report.commit_id),
                                Err(e) => println!("rollback failed: {e}"),
                            }
                        });
                    }
                    query => {
                        if running {
                            println!("a query is still running; /cancel it first");
                            continue;
                        }
                        let agent = agent.clone();
                        let session = session.clone();
                        let query = query.to_string();
                        let done_tx = done_tx.clone();
                        running = true;
                        tokio::spawn(async move {
                            let _ = done_tx.send(agent.run(&session, &query).await).await;
                        });
                    }
                }
            }
        }
    }

    session.cancel();
    Ok(())
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::CheckpointReady { checkpoint_id, tool_use_id, bundle, .. } => println!(
            "  checkpoint {checkpoint_id} (tool {}, {} bytes)",
            tool_use_id.as_deref().unwrap_or("-"),
            bundle.len()
        ),
        AgentEvent::ToolStarted { tool, args, .. } => println!("  -> {tool} {args}"),
        AgentEvent::ToolCompleted { tool, duration_ms, .. } => println!("  <- {tool} ok ({duration_ms}ms)"),
        AgentEvent::ToolError { tool, error, .. } => println!("  <- {tool} failed: {error}"),
        AgentEvent::PermissionDenied { tool, .. } => println!("  permission denied for {tool}"),
        _ => {}
    }
}

fn print_history(session: &SessionHandle) {
    let Some(session) = session.try_lock() else {
        println!("a query is running; history is available once it finishes");
        return;
    };
    for m in session.transcript.messages() {
        let summary = match (m.tool_request(), m.tool_result()) {
            (Some((id, name, input)), _) => format!("tool_use {name} {input} ({id})"),
            (_, Some((id, content))) => format!("tool_result {content} ({id})"),
            _ => m.text(),
        };
        println!(
            "{} {:?} [{}] {}",
            m.id,
            m.role,
            m.checkpoint_id.as_deref().unwrap_or("-"),
            summary
        );
    }
}
