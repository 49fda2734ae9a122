use floppy_choir::{
    Config, DeviceLink, DirectoryLibrary, PlayerUpdate, Song, SongLibrary, spawn_player,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1).map(PathBuf::from);
    let config_path = args.next();
    let song_path = args.next();

    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Ok(port) = std::env::var("ARDUINO") {
        config.link.port = Some(port);
    }

    let link = Arc::new(DeviceLink::new(&config.link));
    link.attach(config.link.endpoint())?;
    let drives = link.query_drive_count()?;
    info!(drives, "device attached");

    if let Some(directory) = &config.library.directory {
        for entry in DirectoryLibrary::new(directory).catalog() {
            info!(id = %entry.id, "found {}", entry.name);
        }
    }

    let Some(song_path) = song_path else {
        info!("no song given; nothing to play");
        return Ok(());
    };

    let song = Song::load(&song_path)?;
    info!(name = %song.name, notes = song.notes.len(), "playing");

    let player = spawn_player(link.clone());
    player.load(song.schedule());
    player.play();

    for update in player.update_rx.iter() {
        match update {
            PlayerUpdate::Finished => break,
            PlayerUpdate::Error { message } => error!(%message, "device error"),
            _ => {}
        }
    }
    Ok(())
}
