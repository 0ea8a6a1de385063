//! Typed node ports.

use crate::node::NodeType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Audio,
    F0,
    Spectrum,
    Aperiodicity,
    /// Bundle of F0, spectrum and aperiodicity.
    Parameters,
    /// Untyped control data. Compatible with every other type.
    Control,
}

impl PortType {
    /// Whether an output of type `self` may feed an input of type `dest`.
    pub fn can_feed(self, dest: PortType) -> bool {
        match (self, dest) {
            (a, b) if a == b => true,
            (PortType::Control, _) | (_, PortType::Control) => true,
            (
                PortType::Parameters,
                PortType::F0 | PortType::Spectrum | PortType::Aperiodicity,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortType::Audio => "audio",
            PortType::F0 => "f0",
            PortType::Spectrum => "spectrum",
            PortType::Aperiodicity => "aperiodicity",
            PortType::Parameters => "parameters",
            PortType::Control => "control",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// A port owned by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: &'static str,
    pub port_type: PortType,
    pub direction: PortDirection,
    pub buffer_size: usize,
}

impl Port {
    pub const fn input(name: &'static str, port_type: PortType) -> Self {
        Self {
            name,
            port_type,
            direction: PortDirection::Input,
            buffer_size: crate::connection::DEFAULT_BUFFER_SIZE,
        }
    }

    pub const fn output(name: &'static str, port_type: PortType) -> Self {
        Self {
            name,
            port_type,
            direction: PortDirection::Output,
            buffer_size: crate::connection::DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Input and output ports a node of `node_type` is created with.
///
/// Custom nodes get `custom_inputs`/`custom_outputs` control ports.
pub(crate) fn layout(
    node_type: NodeType,
    custom_inputs: usize,
    custom_outputs: usize,
) -> (Vec<Port>, Vec<Port>) {
    use PortType::*;
    match node_type {
        NodeType::AudioInput => (vec![], vec![Port::output("audio", Audio)]),
        NodeType::F0Extraction => (
            vec![Port::input("audio", Audio)],
            vec![Port::output("f0", F0)],
        ),
        NodeType::SpectrumAnalysis => (
            vec![Port::input("audio", Audio), Port::input("f0", F0)],
            vec![Port::output("spectrum", Spectrum)],
        ),
        NodeType::AperiodicityAnalysis => (
            vec![Port::input("audio", Audio), Port::input("f0", F0)],
            vec![Port::output("aperiodicity", Aperiodicity)],
        ),
        NodeType::ParameterMerge => (
            vec![
                Port::input("f0", F0),
                Port::input("spectrum", Spectrum),
                Port::input("aperiodicity", Aperiodicity),
            ],
            vec![Port::output("parameters", Parameters)],
        ),
        NodeType::UtauMapping => (
            vec![Port::input("parameters", Parameters)],
            vec![Port::output("parameters", Parameters)],
        ),
        NodeType::Synthesis => (
            vec![
                Port::input("f0", F0),
                Port::input("spectrum", Spectrum),
                Port::input("aperiodicity", Aperiodicity),
            ],
            vec![Port::output("audio", Audio)],
        ),
        NodeType::AudioOutput => (vec![Port::input("audio", Audio)], vec![]),
        NodeType::Custom => (
            (0..custom_inputs)
                .map(|_| Port::input("control", Control))
                .collect(),
            (0..custom_outputs)
                .map(|_| Port::output("control", Control))
                .collect(),
        ),
    }
}
