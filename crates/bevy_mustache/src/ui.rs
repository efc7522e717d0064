use bevy::prelude::ResMut;
use bevy_egui::{egui, EguiContexts};

use mustache_core::RecordingStatus;

use crate::recording::Recorder;

fn status_text(status: RecordingStatus) -> &'static str {
    match status {
        RecordingStatus::Idle => "Starting…",
        RecordingStatus::ReadyToRecord => "Ready",
        RecordingStatus::Recording => "Recording",
        RecordingStatus::Exporting => "Saving…",
    }
}

/// Record toggle at the bottom of the window and the export notice.
pub fn recording_panel(mut contexts: EguiContexts, mut recorder: ResMut<Recorder>) {
    let ctx = contexts.ctx_mut();
    let status = recorder.status();

    egui::Area::new(egui::Id::new("record_toggle"))
        .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -32.0))
        .show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                let (label, color) = match status {
                    RecordingStatus::Recording => ("⏹ Stop", egui::Color32::RED),
                    _ => ("⏺ Record", egui::Color32::WHITE),
                };
                let button = egui::Button::new(egui::RichText::new(label).color(color).size(20.0))
                    .min_size(egui::vec2(120.0, 44.0))
                    .rounding(22.0);
                let enabled = matches!(
                    status,
                    RecordingStatus::ReadyToRecord | RecordingStatus::Recording
                );
                if ui.add_enabled(enabled, button).clicked() {
                    recorder.toggle().ok();
                }
                ui.label(status_text(status));
            });
        });

    let Some(notice) = recorder.notice.clone() else {
        return;
    };
    let mut dismissed = false;
    egui::Window::new(notice.title)
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
        .show(ctx, |ui| {
            ui.label(&notice.message);
            if ui.button(notice.action).clicked() {
                dismissed = true;
            }
        });
    if dismissed {
        recorder.notice = None;
    }
}
