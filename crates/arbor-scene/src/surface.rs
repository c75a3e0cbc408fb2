use arbor_core::Rect;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::node::NodeId;

/// One visible component as handed to the drawing surface.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrawCall {
    #[serde(skip)]
    pub node: NodeId,
    pub path: String,
    pub type_tag: String,
    /// Absolute bounds.
    pub rect: Rect,
    /// Alpha multiplied down from the pane.
    pub alpha: f32,
    pub paint: Map<String, Value>,
}

/// Receiver of a render pass. Calls arrive parent before children, siblings
/// back to front and panes in registration order.
pub trait Surface {
    fn begin(&mut self, _frame: u64) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> anyhow::Result<()>;

    fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> Surface for F
where
    F: FnMut(&DrawCall) -> anyhow::Result<()>,
{
    fn draw(&mut self, call: &DrawCall) -> anyhow::Result<()> {
        self(call)
    }
}

/// Surface that keeps every call of the last completed pass.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub passes: usize,
    pub calls: Vec<DrawCall>,
    pending: Vec<DrawCall>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// One line per call: `path type x,y wxh alpha`.
    pub fn summary(&self) -> String {
        self.calls
            .iter()
            .map(|c| {
                format!(
                    "{} {} {},{} {}x{} a={}",
                    c.path, c.type_tag, c.rect.x, c.rect.y, c.rect.w, c.rect.h, c.alpha
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Surface for RecordingSurface {
    fn begin(&mut self, _frame: u64) -> anyhow::Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> anyhow::Result<()> {
        self.pending.push(call.clone());
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.calls = std::mem::take(&mut self.pending);
        self.passes += 1;
        Ok(())
    }
}
