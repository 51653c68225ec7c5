use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use casino::{
    BroadcastEvent, ChannelBroadcaster, Collaborators, CoordinatorConfig, MemorySessionStore,
    MemoryUserDirectory, ResolverRegistry, SessionCoordinator, StaticCatalog, UserRef, COIN_FLIP,
};

/// Play coin-flip sessions against the in-memory coordinator and report win rates
#[derive(Debug, Parser)]
#[command(name = "simulate")]
struct Args {
    /// Number of sessions to play
    #[arg(short = 'n', long, default_value_t = 1_000)]
    num_games: u32,

    /// Resolver seed; random when omitted
    #[arg(short, long)]
    seed: Option<u64>,

    /// Print every result
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    println!("🎮 Coin Flip Simulation");
    println!("=======================");
    println!("Configuration:");
    println!("  - Number of games: {}", args.num_games);
    println!("  - Seed: {:?}", args.seed);

    let players = vec![
        UserRef::new(Uuid::new_v4(), "alice", 10_000),
        UserRef::new(Uuid::new_v4(), "bob", 10_000),
    ];

    let broadcaster = Arc::new(ChannelBroadcaster::new(args.num_games as usize * 4 + 16));
    let mut events = broadcaster.subscribe();

    let coordinator = SessionCoordinator::new(
        Collaborators {
            store: Arc::new(MemorySessionStore::new()),
            users: Arc::new(MemoryUserDirectory::with_users(players.clone()).await),
            catalog: Arc::new(StaticCatalog::with_defaults()),
            resolvers: ResolverRegistry::with_defaults(args.seed),
            broadcaster: broadcaster.clone(),
        },
        CoordinatorConfig::default(),
    )
    .await;

    let mut wins: HashMap<String, u32> = HashMap::new();
    let mut failures = 0;

    for game_num in 0..args.num_games {
        // Alternate who opens the session so join order does not bias results
        let (host, guest) = if game_num % 2 == 0 {
            (&players[0], &players[1])
        } else {
            (&players[1], &players[0])
        };

        let played = async {
            let session = coordinator.create_session(COIN_FLIP, &host.id).await?;
            coordinator.join_session(session.id, &guest.id).await?;
            let started = coordinator.start_session(session.id).await?;
            coordinator.end_session(session.id).await?;
            Ok::<_, casino::SessionError>(started)
        }
        .await;

        match played {
            Ok(session) => {
                if let Some(outcome) = &session.outcome {
                    let winner = &outcome.winner().display_name;
                    *wins.entry(winner.clone()).or_insert(0) += 1;
                    if args.verbose {
                        println!("  Game {}: {} wins", session.id, winner);
                    }
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("  Game {} failed: {}", game_num + 1, e);
            }
        }
    }

    let mut end_events = 0;
    while let Ok(event) = events.try_recv() {
        let event: &BroadcastEvent = &event;
        if event.event == "end" {
            end_events += 1;
        }
    }

    let completed = args.num_games - failures;
    println!("\n📊 Results:");
    println!("====================");
    for player in &players {
        let count = wins.get(&player.display_name).copied().unwrap_or(0);
        let win_rate = if completed > 0 {
            (count as f64 / completed as f64) * 100.0
        } else {
            0.0
        };
        println!("{}: {} wins ({:.1}%)", player.display_name, count, win_rate);
    }
    println!("Completed games: {}/{}", completed, args.num_games);
    println!("'end' events broadcast: {}", end_events);
}
