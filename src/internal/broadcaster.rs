use tokio::sync::mpsc;

use crate::internal::codec::{self, DrawDelta};
use crate::internal::data_types::PeerIdentity;
use crate::internal::error::Error;
use crate::internal::registry::PeerRegistry;

/// The rendering collaborator. Receives "draw a segment from (prev_x, prev_y) to (x, y)".
pub trait Canvas: Send {
    fn draw_segment(&mut self, segment: &DrawDelta);
}

/// in-memory canvas model: the ordered list of segments applied to it
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Whiteboard {
    segments: Vec<DrawDelta>,
}

impl Whiteboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[DrawDelta] {
        &self.segments
    }
}

impl Canvas for Whiteboard {
    fn draw_segment(&mut self, segment: &DrawDelta) {
        self.segments.push(*segment);
    }
}

/// hands segments to a renderer running elsewhere
impl Canvas for mpsc::UnboundedSender<DrawDelta> {
    fn draw_segment(&mut self, segment: &DrawDelta) {
        if let Err(e) = self.send(*segment) {
            log::error!("failed to pass segment to renderer: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stroke {
    Up,
    Down { prev_x: f64, prev_y: f64 },
}

/// Turns pointer input into draw deltas, echoes them locally and sends them to every registered
/// peer. Deltas from peers are applied as they arrive, without deduplication or reordering.
pub struct Broadcaster<C: Canvas> {
    stroke: Stroke,
    canvas: C,
}

impl<C: Canvas> Broadcaster<C> {
    pub fn new(canvas: C) -> Self {
        Self {
            stroke: Stroke::Up,
            canvas,
        }
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.stroke, Stroke::Down { .. })
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) {
        self.stroke = Stroke::Down {
            prev_x: x,
            prev_y: y,
        };
    }

    /// Returns the delta which was drawn, or None when no stroke is in progress or a coordinate
    /// is not finite. The local echo happens before anything is sent.
    pub async fn pointer_move(
        &mut self,
        x: f64,
        y: f64,
        registry: &PeerRegistry,
    ) -> Option<DrawDelta> {
        let Stroke::Down { prev_x, prev_y } = self.stroke else {
            return None;
        };
        let delta = DrawDelta::new(x, y, prev_x, prev_y);
        // peers could never receive it, so it isn't drawn here either
        let bytes = match codec::encode(&delta) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("dropping segment: {}", e);
                return None;
            }
        };
        self.canvas.draw_segment(&delta);
        let delivered = registry.broadcast(&bytes).await;
        log::trace!("draw delta sent to {}/{} peers", delivered, registry.len());
        self.stroke = Stroke::Down {
            prev_x: x,
            prev_y: y,
        };
        Some(delta)
    }

    pub fn pointer_up(&mut self) {
        self.stroke = Stroke::Up;
    }

    /// decodes and draws one inbound message. the stroke in progress is not affected
    pub fn apply_remote(&mut self, from: &PeerIdentity, data: &[u8]) -> Result<DrawDelta, Error> {
        let delta = codec::decode(data)?;
        log::trace!("applying segment from {}: {:?}", from, delta);
        self.canvas.draw_segment(&delta);
        Ok(delta)
    }
}
