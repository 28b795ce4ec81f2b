use chrono::{DateTime, Local};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::discovery::RoomListing;
use crate::protocol::ChatMessage;
use crate::room::{Room, RoomError, RoomEvent, RoomOptions, Tincan};
use crate::terminal::cli::{Cli, Command, HostArgs, IdentityArgs, JoinArgs, RoomsArgs};
use crate::terminal::error::CliError;
use crate::terminal::input::{self, Input};

/// Scans made while resolving a join target before giving up.
const JOIN_LOOKUP_ATTEMPTS: usize = 3;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ClientConfig::from_env();
    if let Some(relay) = cli.relay {
        config.relay_url = relay;
    }
    cli.timing.apply(&mut config);
    info!(target: "tincan::cli", relay = %config.relay_url, "starting");
    let tincan = Tincan::from_config(config)?;

    match cli.command {
        Command::Rooms(args) => rooms(&tincan, args).await,
        Command::Host(args) => host(&tincan, args).await,
        Command::Join(args) => join(&tincan, args).await,
    }
}

async fn rooms(tincan: &Tincan, args: RoomsArgs) -> Result<(), CliError> {
    let network = tincan.network_key().await?;
    println!("network {}", short_key(&network));
    if !args.watch {
        print_rooms(&tincan.list_rooms().await?);
        return Ok(());
    }

    let (mut listing, scan) = tincan.scanner().watch();
    loop {
        tokio::select! {
            changed = listing.changed() => {
                if changed.is_err() {
                    break;
                }
                print_rooms(&listing.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    scan.abort();
    Ok(())
}

async fn host(tincan: &Tincan, args: HostArgs) -> Result<(), CliError> {
    let password = password_for(&args.identity, false).await?;
    let room = tincan
        .host(&args.room, options(&args.identity, password))
        .await?;
    println!(
        "hosting '{}' as {} ({}){}",
        room.room_name(),
        room.identity().display_name,
        room.local_id(),
        if room.is_encrypted() { ", password protected" } else { "" }
    );
    chat(room).await
}

async fn join(tincan: &Tincan, args: JoinArgs) -> Result<(), CliError> {
    let listing = resolve(tincan, &args.target).await?;
    let password = password_for(&args.identity, listing.has_password).await?;
    println!("joining '{}' hosted by {} ...", listing.name, listing.id);
    let room = match tincan.join(&listing, options(&args.identity, password)).await {
        Ok(room) => room,
        Err(RoomError::AccessDenied) => {
            println!("access denied: wrong password");
            return Err(RoomError::AccessDenied.into());
        }
        Err(err) => return Err(err.into()),
    };
    println!("joined as {} ({})", room.identity().display_name, room.local_id());
    chat(room).await
}

/// Find the listing named by `target`, which is a host id or a room name.
async fn resolve(tincan: &Tincan, target: &str) -> Result<RoomListing, CliError> {
    let target = target.trim();
    for attempt in 0..JOIN_LOOKUP_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(tincan.config().discovery_interval).await;
        }
        let rooms = tincan.list_rooms().await?;
        if let Some(room) = rooms.iter().find(|room| room.id == target) {
            return Ok(room.clone());
        }
        let mut named = rooms.into_iter().filter(|room| room.name == target);
        match (named.next(), named.next()) {
            (Some(room), None) => return Ok(room),
            (Some(_), Some(_)) => return Err(CliError::AmbiguousRoom(target.to_string())),
            _ => {}
        }
    }
    Err(CliError::RoomNotFound(target.to_string()))
}

fn options(identity: &IdentityArgs, password: Option<String>) -> RoomOptions {
    RoomOptions {
        display_name: identity.name.clone(),
        password,
        peer_id: None,
    }
}

async fn password_for(identity: &IdentityArgs, required: bool) -> Result<Option<String>, CliError> {
    if let Some(password) = identity.password_value.clone().filter(|p| !p.is_empty()) {
        return Ok(Some(password));
    }
    if !identity.password && !required {
        return Ok(None);
    }
    let password = tokio::task::spawn_blocking(|| rpassword::prompt_password("room password: "))
        .await
        .map_err(|err| CliError::Runtime(err.to_string()))??;
    Ok(Some(password).filter(|p| !p.is_empty()))
}

async fn chat(room: Room) -> Result<(), CliError> {
    println!("type /help for commands");
    let mut events = room.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_input(&room, input::parse(&line)).await {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(RoomEvent::Ended) | Err(RecvError::Closed) => {
                    println!("* room closed");
                    break;
                }
                Ok(event) => render(&room, event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "tincan::cli", skipped, "display fell behind");
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    room.leave().await;
    Ok(())
}

/// Returns false when the user is done with the room.
async fn handle_input(room: &Room, input: Input) -> bool {
    let outcome = match input {
        Input::Empty => Ok(()),
        Input::Say(text) => room.send(&text).map(|message| print_message(&message)),
        Input::Who => {
            for (index, member) in room.members().iter().enumerate() {
                let mut tags = Vec::new();
                if index == 0 {
                    tags.push("you");
                }
                if member.is_host {
                    tags.push("host");
                }
                let tags = if tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", tags.join(", "))
                };
                println!("  {} ({}){}", member.display_name, member.id, tags);
            }
            Ok(())
        }
        Input::Rename(name) => room.rename(&name),
        Input::BurnLogs => room.burn_logs(),
        Input::BurnChat => room.burn_chat().await,
        Input::Promote(target) => {
            let members = room.members();
            let peer = members
                .iter()
                .skip(1)
                .find(|member| member.id == target || member.display_name == target)
                .map(|member| member.id.clone())
                .unwrap_or(target);
            room.delegate_host(&peer)
        }
        Input::Help => {
            println!("{}", input::HELP);
            Ok(())
        }
        Input::Quit => return false,
        Input::Invalid(message) => {
            println!("{message}");
            Ok(())
        }
    };

    match outcome {
        Ok(()) => true,
        Err(RoomError::Ended) => false,
        Err(err) => {
            println!("! {err}");
            true
        }
    }
}

fn render(room: &Room, event: RoomEvent) {
    let name_of = |peer: &str| {
        room.members()
            .into_iter()
            .find(|member| member.id == peer)
            .map(|member| member.display_name)
            .unwrap_or_else(|| peer.to_string())
    };
    match event {
        RoomEvent::Message(message) => print_message(&message),
        RoomEvent::PeerJoined(peer) => println!("* {peer} joined"),
        RoomEvent::PeerLeft(peer) => println!("* {} left", name_of(&peer)),
        RoomEvent::HistoryBurned { by } => println!("* history burned by {}", name_of(&by)),
        RoomEvent::SessionBurned { by } => println!("* room burned by {}", name_of(&by)),
        RoomEvent::Promoted { by } => println!("* {} made you the host", name_of(&by)),
        RoomEvent::Ended => {}
    }
    let _ = std::io::stdout().flush();
}

fn print_message(message: &ChatMessage) {
    let at = DateTime::from_timestamp_millis(message.timestamp)
        .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default();
    println!("[{at}] {}: {}", message.sender_name, message.content);
}

fn short_key(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}

fn print_rooms(rooms: &[RoomListing]) {
    if rooms.is_empty() {
        println!("no rooms on this network");
        return;
    }
    println!("{:<16} {:<24} {}", "HOST", "ROOM", "LOCKED");
    for room in rooms {
        println!(
            "{:<16} {:<24} {}",
            room.id,
            room.name,
            if room.has_password { "yes" } else { "no" }
        );
    }
}
