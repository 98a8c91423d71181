//! Real-time motion core for a two-motor cable plotter.
//!
//! The controller receives line-oriented commands over a serial link, queues
//! them in a fixed-capacity lookahead buffer, converts targets between
//! Cartesian space and cable-length space (via `vplot-geom`), and drives two
//! step/dir motor drivers plus a pen-lift actuator.
//!
//! Two execution contexts share the axis state: a fixed-period tick interrupt
//! running [`axis::Axis::step`] on both axes, and a run-to-completion main
//! loop feeding [`machine::Controller`]. Everything both contexts touch sits
//! behind `critical-section` guarded cells; the interrupt's common case is a
//! counter increment and a compare.
//!
//! GPIO, the periodic timer and the pen servo are capabilities the board
//! crate provides: output pins are wired in through [`axis::MotorOutputs`],
//! the timer callback calls [`axis::StepTicker::tick`], and the pen actuator
//! implements [`machine::PenLift`]. Nothing here allocates after startup.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod axis;
pub mod block;
pub mod config;
pub mod intake;
pub mod machine;
pub mod parse;
pub mod queue;

pub use axis::{Axis, Direction, MotorOutputs, MotorPins, StepTicker};
pub use block::Block;
pub use intake::LineBuffer;
pub use machine::{Controller, Machine, PenLift};
pub use parse::{Fault, LineStatus};
pub use queue::LookaheadQueue;
