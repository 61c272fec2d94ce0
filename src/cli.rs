//! Command-line interface and REPL

use anyhow::Result;
use colored::*;
use rustyline::DefaultEditor;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::endpoints::{Endpoints, Origin, Received};
use vmidi_bridge::midi;
use vmidi_bridge::VirtualMidiDevice;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ports,
    Activity,
    Send { port: String, data: Vec<u8> },
    Inject { port: String, data: Vec<u8> },
    Quit,
    Empty,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Command::Empty);
    };

    match head {
        "help" | "?" => Ok(Command::Help),
        "ports" => Ok(Command::Ports),
        "activity" => Ok(Command::Activity),
        "exit" | "quit" => Ok(Command::Quit),
        "send" | "inject" => {
            let port = words
                .next()
                .ok_or_else(|| format!("usage: {} <port> <bytes...>", head))?
                .to_string();
            let data = midi::parse_bytes(words)?;
            if data.is_empty() {
                return Err(format!("usage: {} <port> <bytes...>", head));
            }
            if head == "send" {
                Ok(Command::Send { port, data })
            } else {
                Ok(Command::Inject { port, data })
            }
        },
        other => Err(format!("unknown command '{}', try 'help'", other)),
    }
}

pub fn print_received(received: &Received) {
    let side = match received.origin {
        Origin::App => "APP ".green(),
        Origin::System => "SYS ".blue(),
    };
    println!("{} {}", side, midi::format_message(&received.port, &received.data));
}

fn print_help(endpoints: &Endpoints) {
    println!("{}", "Commands:".bold());
    println!("  ports                      show ports and handles");
    println!("  send <port> <bytes...>     send from the application side (hex, or #<decimal>)");
    if endpoints.can_inject() {
        println!("  inject <port> <bytes...>   play the system side of a port");
    }
    println!("  activity                   messages forwarded per route");
    println!("  quit                       stop the device and exit");
}

fn print_ports(device: &VirtualMidiDevice) {
    match device.ports() {
        Ok(table) => {
            for (port, handles) in table.iter() {
                println!(
                    "  {:<16} in {:<5} out {:<5}  system: {}_in / {}_out",
                    port.bright_white(),
                    handles.input.to_string(),
                    handles.output.to_string(),
                    port,
                    port
                );
            }
        },
        Err(e) => println!("  {}", e.to_string().red()),
    }
}

fn print_activity(device: &VirtualMidiDevice) {
    let stats = device.activity();
    if stats.is_empty() {
        println!("  {}", "No messages forwarded yet".dimmed());
        return;
    }
    for s in stats {
        let ago = s
            .last_message
            .map(|t| format!("{:.1}s ago", t.elapsed().as_secs_f32()))
            .unwrap_or_default();
        println!("  {} >> {}  {} msg  {}", s.source, s.destination, s.messages, ago.dimmed());
    }
}

/// Interactive prompt driving the device until `quit` or EOF
pub fn run_repl(
    device: &VirtualMidiDevice,
    endpoints: &Endpoints,
    rx: &mut UnboundedReceiver<Received>,
) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", format!("=== {} ===", device.name()).bold().cyan());
    print_help(endpoints);

    loop {
        while let Ok(received) = rx.try_recv() {
            print_received(&received);
        }

        let line = match rl.readline("vmidi> ") {
            Ok(line) => line,
            Err(_) => break,
        };
        let _ = rl.add_history_entry(line.as_str());

        let result = match parse_command(&line) {
            Ok(Command::Empty) => Ok(()),
            Ok(Command::Quit) => break,
            Ok(Command::Help) => {
                print_help(endpoints);
                Ok(())
            },
            Ok(Command::Ports) => {
                print_ports(device);
                Ok(())
            },
            Ok(Command::Activity) => {
                print_activity(device);
                Ok(())
            },
            Ok(Command::Send { port, data }) => endpoints.send(&port, &data),
            Ok(Command::Inject { port, data }) => endpoints.inject(&port, &data),
            Err(msg) => {
                println!("{}", msg.yellow());
                Ok(())
            },
        };

        if let Err(e) = result {
            println!("{}", e.to_string().red());
        }
        if let Some(failure) = device.engine_failure() {
            println!("{} {}", "Routing engine failed:".red().bold(), failure);
            break;
        }
    }

    Ok(())
}
