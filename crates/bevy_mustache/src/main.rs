use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::window::WindowResolution;
use bevy_egui::EguiPlugin;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use mustache_core::{
    Authorization, DirectoryLibrary, FrameLogCapture, OverlayFeatureMap, RecordingSession,
};

use crate::overlay::{AssetDir, Tap};
use crate::recording::Recorder;
use crate::tracking::Tracking;

mod api;
mod overlay;
mod recording;
mod tracking;
mod ui;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MediaAccess {
    Authorized,
    Denied,
    Restricted,
    NotDetermined,
}

impl From<MediaAccess> for Authorization {
    fn from(value: MediaAccess) -> Self {
        match value {
            MediaAccess::Authorized => Authorization::Authorized,
            MediaAccess::Denied => Authorization::Denied,
            MediaAccess::Restricted => Authorization::Restricted,
            MediaAccess::NotDetermined => Authorization::NotDetermined,
        }
    }
}

#[derive(Parser)]
struct Options {
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub api_bind: String,
    /// JSON feature map replacing the built-in mustache.
    #[arg(long, short = 'f')]
    pub features: Option<PathBuf>,
    /// Where in-progress recordings are written.
    #[arg(long, default_value = "captures")]
    pub capture_dir: PathBuf,
    /// Where finished recordings are exported to.
    #[arg(long, default_value = "library")]
    pub library_dir: PathBuf,
    /// Media library access granted to the exporter.
    #[arg(long, value_enum, default_value_t = MediaAccess::Authorized)]
    pub media_access: MediaAccess,
    /// Directory holding `<variant>.png` images.
    #[arg(long, default_value = "assets")]
    pub asset_dir: PathBuf,
    #[arg(long, short = 'W', default_value = "1280")]
    pub width: u32,
    #[arg(long, short = 'H', default_value = "720")]
    pub height: u32,
}

/// The camera the scene is composited from.
#[derive(Component)]
pub struct MainCamera;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let options = Options::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let features = match &options.features {
        Some(path) => OverlayFeatureMap::from_slice(&std::fs::read(path)?)?,
        None => OverlayFeatureMap::default(),
    };
    let features = Arc::new(features);

    let capture = Arc::new(FrameLogCapture::new(&options.capture_dir));
    let library = Arc::new(DirectoryLibrary::new(
        &options.library_dir,
        options.media_access.into(),
    ));
    let (session, events) = RecordingSession::new(capture, library, runtime.handle().clone());

    // Image lookups and the asset server resolve against the same root.
    let asset_dir = std::env::current_dir()?.join(&options.asset_dir);

    let api_addr: SocketAddr = options.api_bind.parse()?;
    let (api_state, api_resource) = api::ApiState::new(session.clone());
    runtime.spawn(async move {
        tracing::info!("tracking API listening on {}", api_addr);
        if let Err(err) = axum_server::bind(api_addr)
            .serve(api::new_api().with_state(api_state).into_make_service())
            .await
        {
            tracing::error!("failed to serve API: {}", err);
        }
    });

    let mut app = App::new();
    app.add_plugins(
        DefaultPlugins
            .set(WindowPlugin {
                primary_window: Some(Window {
                    title: "Mustache".into(),
                    resolution: WindowResolution::new(options.width as f32, options.height as f32),
                    ..default()
                }),
                ..default()
            })
            .set(AssetPlugin {
                file_path: asset_dir.to_string_lossy().into_owned(),
                ..default()
            })
            .disable::<LogPlugin>(),
    )
    .add_plugins(EguiPlugin)
    .add_event::<Tap>()
    .insert_resource(AssetDir(asset_dir))
    .insert_resource(api_resource)
    .insert_resource(Tracking::new(features))
    .insert_resource(Recorder::new(session.clone(), events))
    .add_systems(Startup, (init, overlay::init_visuals, recording::prepare_recorder))
    .add_systems(
        Update,
        (
            api::update_api,
            overlay::sync_overlays,
            overlay::mouse_taps,
            overlay::handle_taps,
            recording::toggle_recording,
            recording::capture_frames,
            recording::poll_recording_events,
            ui::recording_panel,
        )
            .chain(),
    );

    let exit = app.run();

    // The window is gone; make sure a recording in progress still lands in
    // the library before the runtime shuts down.
    session.teardown();
    runtime.block_on(session.flush());
    tracing::info!("exiting: {:?}", exit);
    Ok(())
}

fn init(mut commands: Commands) {
    commands.spawn(DirectionalLightBundle {
        transform: Transform::from_xyz(0.5, 1., 1.).looking_at(Vec3::ZERO, Vec3::Y),
        ..default()
    });

    // Tracker coordinates put the camera at the origin looking down -Z.
    commands.spawn((Camera3dBundle::default(), MainCamera));
}
