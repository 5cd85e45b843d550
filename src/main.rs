use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn, Level};

use peershare::crypto::Sha256;
use peershare::tcp::chat::ChatMessage;
use peershare::tcp::{ChatEvent, ChatSender, ChatSession, FileOffer, InboundRequest};
use peershare::{Node, NodeConfig, TransferProgress};

#[derive(Parser)]
#[command(name = "peershare")]
#[command(
    about = "Serverless encrypted file transfer and chat on the local network",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Name announced to other peers
    #[arg(short, long, global = true)]
    username: Option<String>,

    /// TCP listen port (0 picks a free one)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce this peer and wait for files and chats
    Listen {
        /// Accept every inbound file without asking
        #[arg(long)]
        auto_accept: bool,

        /// Directory for received files
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// List peers seen during one discovery window
    Peers,
    /// Send a file to a peer
    Send {
        /// File to send
        path: PathBuf,

        /// Recipient username
        #[arg(long)]
        to: String,
    },
    /// Chat with a peer
    Chat {
        /// Peer username
        #[arg(long)]
        to: String,
    },
    /// Print the SHA-256 digest of a string
    Hash { text: String },
}

type StdinLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(username) = cli.username {
        config.username = username;
    }
    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    match cli.command {
        Commands::Listen {
            auto_accept,
            save_dir,
        } => {
            if let Some(dir) = save_dir {
                config.save_dir = dir;
            }
            listen(Node::new(config)?, auto_accept).await?;
        }
        Commands::Peers => {
            let node = Node::new(config)?;
            let peers = node.discover_once().await?;
            if peers.is_empty() {
                println!("No peers found");
            }
            for peer in node.registry().snapshot().await {
                println!(
                    "{:<20} {:<22} {} bits",
                    peer.username,
                    peer.addr,
                    peer.public_key.bits()
                );
            }
        }
        Commands::Send { path, to } => {
            let node = Node::new(config)?;
            node.discover_once().await?;
            let peer = node.find_peer(&to).await?;

            let bar = transfer_bar();
            let result = node.send_file(&path, &peer, |p| update_bar(&bar, p)).await;
            bar.finish_and_clear();
            match result {
                Ok(record) => println!(
                    "Sent {} ({} bytes) to {}",
                    record.filename, record.size, record.receiver
                ),
                Err(e) if e.is_negative_outcome() => println!("Not sent: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Chat { to } => {
            let node = Node::new(config)?;
            node.discover_once().await?;
            let peer = node.find_peer(&to).await?;
            let session = node.start_chat(&peer).await?;
            let mut stdin = BufReader::new(tokio::io::stdin()).lines();
            run_chat(session, &mut stdin).await?;
        }
        Commands::Hash { text } => {
            println!("{}", Sha256::hex_digest(text.as_bytes()));
        }
    }

    Ok(())
}

/// One thing the listen loop has to react to
enum ListenInput {
    Shutdown,
    Request(Option<InboundRequest>),
    Chat(Option<ChatEvent>),
    Line(std::io::Result<Option<String>>),
    Finished,
}

async fn listen(node: Node, auto_accept: bool) -> Result<(), Box<dyn Error>> {
    let node = Arc::new(node);
    let mut listening = node.listen().await?;
    let port = listening.addr.port();
    info!("{} listening on port {}", node.username(), port);

    let _broadcast = node.start_broadcast(port);
    let _eviction = node.start_eviction();
    match node.start_scan().await {
        Ok(_scan) => {}
        Err(e) => warn!("Continuous discovery disabled: {}", e),
    }

    let bars = MultiProgress::new();
    let mut transfers = JoinSet::new();
    let mut chat: Option<(ChatSender, mpsc::Receiver<ChatEvent>)> = None;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let input = tokio::select! {
            _ = &mut shutdown => ListenInput::Shutdown,
            request = listening.requests.recv() => ListenInput::Request(request),
            event = next_chat_event(&mut chat) => ListenInput::Chat(event),
            line = stdin.next_line(), if chat.is_some() => ListenInput::Line(line),
            Some(_) = transfers.join_next() => ListenInput::Finished,
        };

        match input {
            ListenInput::Shutdown | ListenInput::Request(None) => break,
            ListenInput::Finished => {}
            ListenInput::Request(Some(InboundRequest::File(offer))) => {
                let accept = if auto_accept {
                    true
                } else if chat.is_some() {
                    println!(
                        "Declining {} from {} during a chat",
                        offer.filename(),
                        offer.sender()
                    );
                    false
                } else {
                    let question = format!(
                        "{} wants to send {} ({} encrypted bytes). Accept? [y/N] ",
                        offer.sender(),
                        offer.filename(),
                        offer.encrypted_len()
                    );
                    tokio::select! {
                        _ = &mut shutdown => break,
                        answer = ask(&mut stdin, &question) => answer?,
                    }
                };

                let node = node.clone();
                let bars = bars.clone();
                transfers.spawn(async move { receive(&node, offer, accept, &bars).await });
            }
            ListenInput::Request(Some(InboundRequest::Chat(offer))) => {
                let accept = if chat.is_some() {
                    println!(
                        "Declining chat from {} during another chat",
                        offer.peer_username()
                    );
                    false
                } else {
                    let question =
                        format!("{} wants to chat. Accept? [y/N] ", offer.peer_username());
                    tokio::select! {
                        _ = &mut shutdown => break,
                        answer = ask(&mut stdin, &question) => answer?,
                    }
                };

                if accept {
                    let session = offer.accept(node.cancel_token());
                    println!("Chatting with {}. Empty line to leave.", session.peer());
                    chat = Some(session.into_parts());
                } else if let Err(e) = offer.reject().await {
                    warn!("Failed to reject chat: {}", e);
                }
            }
            ListenInput::Chat(Some(ChatEvent::Message(message))) => print_message(&message),
            ListenInput::Chat(Some(ChatEvent::Disconnected) | None) => {
                println!("Peer disconnected");
                end_chat(&mut chat).await;
            }
            ListenInput::Line(line) => match line?.filter(|line| !line.is_empty()) {
                Some(line) => {
                    if let Some((sender, _)) = chat.as_mut() {
                        sender.send(&line).await?;
                    }
                }
                None => end_chat(&mut chat).await,
            },
        }
    }

    node.shutdown();
    end_chat(&mut chat).await;
    while transfers.join_next().await.is_some() {}
    for record in node.history().await {
        info!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

/// Next event of the active chat; never resolves without one
async fn next_chat_event(
    chat: &mut Option<(ChatSender, mpsc::Receiver<ChatEvent>)>,
) -> Option<ChatEvent> {
    match chat {
        Some((_, events)) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn end_chat(chat: &mut Option<(ChatSender, mpsc::Receiver<ChatEvent>)>) {
    if let Some((sender, _)) = chat.take() {
        if let Err(e) = sender.close().await {
            warn!("Failed to close chat: {}", e);
        }
    }
}

fn print_message(message: &ChatMessage) {
    println!(
        "[{}] {}: {}",
        message.received_at.format("%H:%M:%S"),
        message.from,
        message.text
    );
}

/// Settle `offer`; the node records the outcome either way
async fn receive(node: &Node, offer: FileOffer, accept: bool, bars: &MultiProgress) {
    let filename = offer.filename().to_string();
    let sender = offer.sender().to_string();

    if !accept {
        if let Err(e) = node.reject_offer(offer).await {
            warn!("Failed to reject {}: {}", filename, e);
        }
        return;
    }

    let dest = unique_destination(&offer.destination_in(&node.config().save_dir));
    let bar = bars.add(transfer_bar());
    let result = node.accept_offer(offer, &dest, |p| update_bar(&bar, p)).await;
    bar.finish_and_clear();

    match result {
        Ok(record) => {
            println!("Saved {} from {} to {}", record.filename, record.sender, dest.display());
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => println!("Receiving {} from {} failed: {}", filename, sender, e),
    }
}

/// Bridge a chat session to stdin/stdout until either side leaves or Ctrl-C
async fn run_chat(session: ChatSession, stdin: &mut StdinLines) -> Result<(), Box<dyn Error>> {
    println!("Chatting with {}. Empty line or EOF to leave.", session.peer());
    let (mut sender, mut events) = session.into_parts();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(ChatEvent::Message(message)) => print_message(&message),
                Some(ChatEvent::Disconnected) | None => {
                    println!("Peer disconnected");
                    break;
                }
            },
            line = stdin.next_line() => match line? {
                Some(line) if !line.is_empty() => sender.send(&line).await?,
                _ => break,
            },
        }
    }

    sender.close().await?;
    Ok(())
}

async fn ask(stdin: &mut StdinLines, question: &str) -> Result<bool, Box<dyn Error>> {
    println!("{}", question);
    let answer = stdin.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// `path`, or `name (n).ext` if it already exists
fn unique_destination(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("received");
    let ext = path.extension().and_then(|s| s.to_str());
    (1..)
        .map(|n| {
            let name = match ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

fn transfer_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn update_bar(bar: &ProgressBar, progress: TransferProgress) {
    bar.set_length(progress.total);
    bar.set_position(progress.transferred);
}
