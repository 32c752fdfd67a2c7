// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image-processing node family: the boundary to external GPU kernels.
//!
//! The engine never touches texture contents. Filters hold an opaque
//! [`Processor`] supplied by the GPU layer, pass input handles through,
//! and publish their output handle downstream. All of these nodes are
//! debounced by the evaluator since a kernel pass is expensive.

use crate::function::Function;
use crate::graph::FunctionEnv;
use crate::port::InputPort;
use crate::value::{TextureHandle, ValueKind};
use serde::{Deserialize, Serialize};

/// Contract for an external GPU kernel.
///
/// `process` mutates the output texture in place; `complete` signals the
/// caller may read or chain the result; `release` frees kernel-owned GPU
/// state. Handles are opaque to the engine.
pub trait Processor: Send {
    /// Run the kernel over the inputs into the output texture.
    fn process(
        &mut self,
        width: u32,
        height: u32,
        inputs: &[TextureHandle],
        output: TextureHandle,
    );
    /// Signal that the output may be read or chained.
    fn complete(&mut self);
    /// Free kernel-owned GPU state.
    fn release(&mut self);
}

/// Contract for the per-pixel shader kernel behind a pixel-processor
/// node: a [`Processor`] that additionally accepts the generated fragment
/// program before running.
pub trait PixelKernel: Send {
    /// Install a freshly generated fragment program.
    fn set_program(&mut self, source: &str);
    /// Run the installed program over the inputs into the output texture.
    fn process(
        &mut self,
        width: u32,
        height: u32,
        inputs: &[TextureHandle],
        output: TextureHandle,
    );
    /// Signal that the output may be read or chained.
    fn complete(&mut self);
    /// Free kernel-owned GPU state.
    fn release(&mut self);
}

/// Blend modes for the blend filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    /// Foreground over background by alpha.
    Copy,
    /// Additive.
    Add,
    /// Multiplicative.
    Multiply,
    /// Screen.
    Screen,
    /// Overlay.
    Overlay,
    /// Per-channel minimum.
    Darken,
    /// Per-channel maximum.
    Lighten,
}

/// Which filter a [`FilterNode`] performs, with its parameters. The
/// numeric work happens in the external processor; parameters here are
/// what gets handed across (after parameter-override consultation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Gaussian blur.
    Blur {
        /// Blur radius.
        intensity: f32,
    },
    /// Blend two images with an optional mask.
    Blend {
        /// Blend mode.
        mode: BlendMode,
        /// Foreground opacity.
        alpha: f32,
    },
    /// Invert channels.
    Invert,
}

impl FilterKind {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blur { .. } => "Blur",
            Self::Blend { .. } => "Blend",
            Self::Invert => "Invert",
        }
    }

    pub(crate) fn input_ports(&self) -> Vec<InputPort> {
        match self {
            Self::Blur { .. } | Self::Invert => {
                vec![InputPort::new("Image Input", ValueKind::ANY_IMAGE)]
            }
            Self::Blend { .. } => vec![
                InputPort::new("Foreground", ValueKind::ANY_IMAGE),
                InputPort::new("Background", ValueKind::ANY_IMAGE),
                InputPort::new("Mask", ValueKind::GRAY).optional(),
            ],
        }
    }

    pub(crate) fn output_mask(&self) -> ValueKind {
        ValueKind::ANY_IMAGE
    }

    /// The property name an enclosing graph may override, if any.
    pub fn parameter_name(&self) -> Option<&'static str> {
        match self {
            Self::Blur { .. } => Some("intensity"),
            Self::Blend { .. } => Some("alpha"),
            Self::Invert => None,
        }
    }

    /// Apply a resolved override to the matching parameter.
    pub(crate) fn apply_override(&mut self, value: f32) {
        match self {
            Self::Blur { intensity } => *intensity = value,
            Self::Blend { alpha, .. } => *alpha = value,
            Self::Invert => {}
        }
    }
}

/// An image filter node: parameters plus the external processor and the
/// output texture it owns.
pub struct FilterNode {
    /// Filter type and parameters.
    pub kind: FilterKind,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// The output texture, exclusively owned by this node and released
    /// with it.
    pub buffer: TextureHandle,
    processor: Box<dyn Processor>,
}

impl FilterNode {
    /// Create a filter around an externally supplied processor and output
    /// texture.
    pub fn new(
        kind: FilterKind,
        width: u32,
        height: u32,
        buffer: TextureHandle,
        processor: Box<dyn Processor>,
    ) -> Self {
        Self {
            kind,
            width,
            height,
            buffer,
            processor,
        }
    }

    /// Run the processor over the given inputs. Returns the output handle
    /// on success; inputs must all be live.
    pub(crate) fn run(&mut self, inputs: &[TextureHandle]) -> Option<TextureHandle> {
        if !self.buffer.is_valid() || inputs.iter().any(|t| !t.is_valid()) {
            return None;
        }
        self.processor
            .process(self.width, self.height, inputs, self.buffer);
        self.processor.complete();
        Some(self.buffer)
    }

    pub(crate) fn release(&mut self) {
        self.processor.release();
    }
}

impl std::fmt::Debug for FilterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterNode")
            .field("kind", &self.kind)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

/// A per-pixel function node. Owns a [`Function`] whose emitted fragment
/// program drives the kernel; while the function is incomplete the
/// previous valid program is retained unchanged.
pub struct PixelProcessorNode {
    /// The per-pixel function authored inside this node.
    pub function: Function,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// The output texture, exclusively owned by this node.
    pub buffer: TextureHandle,
    program: Option<String>,
    kernel: Box<dyn PixelKernel>,
}

impl PixelProcessorNode {
    /// Initial and minimum texture input count.
    pub const MIN_INPUTS: usize = 4;

    /// Create a pixel processor around an externally supplied kernel and
    /// output texture.
    pub fn new(width: u32, height: u32, buffer: TextureHandle, kernel: Box<dyn PixelKernel>) -> Self {
        let mut function = Function::new("Pixel Processor Function");
        function.expected =
            ValueKind::FLOAT | ValueKind::FLOAT4 | ValueKind::COLOR | ValueKind::GRAY;
        Self {
            function,
            width,
            height,
            buffer,
            program: None,
            kernel,
        }
    }

    /// The last valid fragment program, if any emission has succeeded.
    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    /// Re-emit the fragment program if the function is currently
    /// compilable; otherwise keep the previous program unchanged.
    pub(crate) fn refresh_program(&mut self, env: &FunctionEnv) {
        match self.function.fragment_source(env) {
            Some(source) => {
                if self.program.as_deref() != Some(source.as_str()) {
                    self.kernel.set_program(&source);
                    self.program = Some(source);
                }
            }
            None => {
                tracing::debug!("pixel function not compilable; keeping previous program");
            }
        }
    }

    /// Refresh the program and run the kernel. `None` when no valid
    /// program exists yet.
    pub(crate) fn run(
        &mut self,
        env: &FunctionEnv,
        inputs: &[TextureHandle],
    ) -> Option<TextureHandle> {
        self.refresh_program(env);
        self.program.as_ref()?;
        if !self.buffer.is_valid() {
            return None;
        }
        self.kernel
            .process(self.width, self.height, inputs, self.buffer);
        self.kernel.complete();
        Some(self.buffer)
    }

    pub(crate) fn release(&mut self) {
        self.kernel.release();
    }
}

impl std::fmt::Debug for PixelProcessorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelProcessorNode")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("buffer", &self.buffer)
            .field("program", &self.program.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::Evaluator;
    use crate::graph::Graph;
    use crate::node::{Node, NodeKind};
    use crate::value::Value;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct RecordingKernel {
        programs: Arc<Mutex<Vec<String>>>,
        runs: Arc<Mutex<usize>>,
    }

    impl PixelKernel for RecordingKernel {
        fn set_program(&mut self, source: &str) {
            self.programs.lock().unwrap().push(source.to_string());
        }
        fn process(&mut self, _w: u32, _h: u32, _inputs: &[TextureHandle], _out: TextureHandle) {
            *self.runs.lock().unwrap() += 1;
        }
        fn complete(&mut self) {}
        fn release(&mut self) {}
    }

    fn pixel_with_constant() -> (PixelProcessorNode, Arc<Mutex<Vec<String>>>, Arc<Mutex<usize>>) {
        let programs = Arc::new(Mutex::new(Vec::new()));
        let runs = Arc::new(Mutex::new(0));
        let mut pixel = PixelProcessorNode::new(
            64,
            64,
            TextureHandle(5),
            Box::new(RecordingKernel {
                programs: Arc::clone(&programs),
                runs: Arc::clone(&runs),
            }),
        );
        let c = pixel
            .function
            .add_node(Node::new(NodeKind::Constant(Value::Float4(glam::Vec4::ONE))))
            .unwrap();
        pixel.function.set_output_node(Some(c));
        (pixel, programs, runs)
    }

    #[test]
    fn test_pixel_processor_compiles_and_runs() {
        let (pixel, programs, runs) = pixel_with_constant();
        let mut g = Graph::new("g");
        let px = g.add_node(Node::new(NodeKind::PixelProcessor(pixel)));

        let mut ev = Evaluator::with_window(Duration::from_millis(10));
        ev.settle(&mut g);

        assert_eq!(programs.lock().unwrap().len(), 1);
        assert!(programs.lock().unwrap()[0].starts_with("#version 330 core"));
        assert_eq!(*runs.lock().unwrap(), 1);
        assert_eq!(
            g.node(px).unwrap().outputs[0].value,
            Some(Value::Texture(TextureHandle(5)))
        );
    }

    #[test]
    fn test_pixel_processor_retains_program_while_incomplete() {
        let (pixel, programs, runs) = pixel_with_constant();
        let mut g = Graph::new("g");
        let px = g.add_node(Node::new(NodeKind::PixelProcessor(pixel)));

        let mut ev = Evaluator::with_window(Duration::from_millis(10));
        ev.settle(&mut g);
        let first = match &g.node(px).unwrap().kind {
            NodeKind::PixelProcessor(p) => p.program().unwrap().to_string(),
            _ => unreachable!(),
        };

        // Break the function: no output designated means not compilable.
        if let Some(node) = g.node_mut(px) {
            if let NodeKind::PixelProcessor(p) = &mut node.kind {
                p.function.set_output_node(None);
            }
        }
        g.dirty(px);
        ev.settle(&mut g);

        match &g.node(px).unwrap().kind {
            NodeKind::PixelProcessor(p) => assert_eq!(p.program(), Some(first.as_str())),
            _ => unreachable!(),
        }
        // The stale emission never reached the kernel; the old program
        // kept running.
        assert_eq!(programs.lock().unwrap().len(), 1);
        assert_eq!(*runs.lock().unwrap(), 2);
    }

    #[test]
    fn test_filter_kind_parameter_names() {
        assert_eq!(
            FilterKind::Blur { intensity: 1.0 }.parameter_name(),
            Some("intensity")
        );
        assert_eq!(FilterKind::Invert.parameter_name(), None);
    }
}
