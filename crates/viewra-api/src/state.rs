//! Shared application state for HTTP handlers

use std::sync::Arc;
use viewra_core::PlaybackConfig;
use viewra_decision::MediaProber;
use viewra_transcoder::TranscoderService;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PlaybackConfig>,
    pub transcoder: TranscoderService,
    pub prober: MediaProber,
}

impl AppState {
    pub fn new(config: Arc<PlaybackConfig>, transcoder: TranscoderService) -> Self {
        let prober = MediaProber::from_encoder_path(&config.transcoding.encoder_path);
        Self {
            config,
            transcoder,
            prober,
        }
    }
}
