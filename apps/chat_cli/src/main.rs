use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ClientSettings, RestClient, RoomController, SessionContext, StompConnector, SwitchOutcome,
};
use shared::domain::RoomId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod command;
mod terminal;

use command::{Command, HELP};
use terminal::TerminalRenderer;

#[derive(Parser, Debug)]
#[command(about = "Line-oriented chat room client")]
struct Args {
    /// Overrides `server_url` from client.toml and APP__SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    username: String,
    #[arg(long)]
    password: String,
    /// Register the account before signing in.
    #[arg(long)]
    signup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = ClientSettings::load();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }

    let rest = Arc::new(RestClient::new(&settings.server_url).context("invalid server url")?);
    if args.signup {
        rest.signup(&args.username, &args.password)
            .await
            .context("signup failed")?;
        println!("Account {} created", args.username);
    }
    let auth = rest
        .login(&args.username, &args.password)
        .await
        .context("login failed")?;
    info!(username = %auth.username, "cli: signed in");

    let connector = Arc::new(StompConnector::new(&settings).context("invalid websocket settings")?);
    let controller = RoomController::new(
        SessionContext {
            server_url: settings.server_url.clone(),
            auth_token: auth.token,
            username: auth.username,
        },
        rest.clone(),
        connector,
        Arc::new(TerminalRenderer),
    );

    println!("Signed in as {}. Type /help for commands.", controller.context().username);
    list_rooms(&rest, &controller).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = run(&rest, &controller, command).await {
            eprintln!("error: {err:#}");
        }
    }

    controller.leave().await;
    Ok(())
}

async fn run(rest: &RestClient, controller: &Arc<RoomController>, command: Command) -> Result<()> {
    let token = controller.context().auth_token.clone();
    match command {
        Command::Rooms => list_rooms(rest, controller).await,
        Command::Join(room_id) => join(controller, room_id).await?,
        Command::Create(name) => {
            let room = rest
                .create_room(&token, &name)
                .await
                .context("could not create room")?;
            println!("Created room {} ({})", room.name, room.id);
            join(controller, room.id).await?;
        }
        Command::Invite => {
            let room_id = controller
                .active_room()
                .await
                .context("join a room first")?;
            let code = rest
                .create_invite(&token, room_id)
                .await
                .context("could not create invite")?;
            println!("Invite code for room {room_id}: {code}");
        }
        Command::Accept(code) => {
            let room = rest
                .accept_invite(&token, &code)
                .await
                .context("could not accept invite")?;
            println!("Joined {} ({})", room.name, room.id);
            join(controller, room.id).await?;
        }
        Command::Edit {
            message_id,
            content,
        } => controller.edit_message(message_id, &content).await?,
        Command::Delete(identity) => controller.delete_message(identity).await?,
        Command::Say(content) => controller.send_message(&content).await?,
        Command::Help => println!("{HELP}"),
        Command::Quit | Command::Nothing => {}
    }
    Ok(())
}

async fn join(controller: &Arc<RoomController>, room_id: RoomId) -> Result<()> {
    match controller.switch_room(room_id).await? {
        SwitchOutcome::AlreadyActive => println!("Already in room {room_id}"),
        SwitchOutcome::Switched => println!("Now in room {room_id}"),
        SwitchOutcome::Superseded => {}
    }
    Ok(())
}

async fn list_rooms(rest: &RestClient, controller: &RoomController) {
    match rest.list_rooms(&controller.context().auth_token).await {
        Ok(rooms) if rooms.is_empty() => println!("No rooms yet. /create <name> to start one."),
        Ok(rooms) => {
            for room in rooms {
                println!("  {:>4}  {}", room.id.0, room.name);
            }
        }
        Err(err) => eprintln!("error: could not list rooms: {err}"),
    }
}
