//! Screen rendering for the line editor: compose the desired frame from
//! prompt, buffer, colours, and indents, then emit the minimal terminal
//! update relative to the previous frame.

pub mod frame;
pub mod screen;

pub use frame::{Cell, Frame, FrameInput, INDENT_STEP, compose, style_for};
pub use screen::{RenderMetrics, Screen, finish_line};
