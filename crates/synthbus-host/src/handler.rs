//! Control commands answered by the synth host.

use crate::engine::SynthControl;
use std::sync::Arc;
use synthbus_control::{CommandHandler, LevelsReport, Request, Response};
use synthbus_core::BusRegion;

/// Serves `PANIC`, `RESET` and `GET_LEVELS`. Bank lists belong to the companion.
pub struct SynthCommandHandler<S: SynthControl> {
    synth: Arc<S>,
    levels: Option<Arc<dyn LevelSource>>,
}

/// Where `GET_LEVELS` reads from.
pub trait LevelSource: Send + Sync {
    fn levels(&self) -> LevelsReport;
}

impl LevelSource for BusRegion {
    fn levels(&self) -> LevelsReport {
        let header = self.header();
        let (master_l, master_r) = header.master_peaks();
        LevelsReport {
            master_l,
            master_r,
            total_voices: header.total_voices(),
        }
    }
}

impl<S: SynthControl> SynthCommandHandler<S> {
    pub fn new(synth: Arc<S>) -> Self {
        Self {
            synth,
            levels: None,
        }
    }

    pub fn with_levels(mut self, levels: Arc<dyn LevelSource>) -> Self {
        self.levels = Some(levels);
        self
    }
}

impl<S: SynthControl> CommandHandler for SynthCommandHandler<S> {
    fn handle(&self, request: &Request) -> Response {
        match request {
            Request::Panic => {
                self.synth.silence_all();
                tracing::info!("Panic: all voices silenced");
                Response::ok()
            }
            Request::Reset => {
                self.synth.reset();
                tracing::info!("Synth reset");
                Response::ok()
            }
            Request::GetLevels => match &self.levels {
                Some(source) => Response::Data(source.levels().encode()),
                None => Response::error("levels unavailable, audio bus not connected"),
            },
            Request::ListBanks { .. } => Response::error("bank lists are served by the companion"),
        }
    }
}
