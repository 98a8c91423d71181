//! Geometry of the v-plotter: conversion between Cartesian coordinates,
//! cable lengths and stepper steps.
//!
//! The pen carriage hangs from two cables wound on pulleys a fixed distance
//! apart. We call the cable wound by the first motor "a" and the other "b".
//! The machine origin sits half the pulley separation out along each axis, so
//! a cold start with both cables at `home_lengths` is at `x = 0`.
//!
//! This crate supports `no_std` and uses `libm` to allow for running in
//! embedded contexts. Lengths are millimeters and the math is done in `f64`:
//! with pulleys nearly two meters apart, the squared-length cancellations in
//! the forward conversion lose too much in `f32` to round-trip below a
//! millimeter.

#![cfg_attr(not(feature = "std"), no_std)]

use core::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};
use libm::{round, sqrt};

pub type Point = euclid::Point2D<f64, Mm>;

pub struct Mm;

pub type Len = euclid::Length<f64, Mm>;

fn square(x: f64) -> f64 {
    x * x
}

pub trait LenExt {
    fn mm(self) -> Len;
}

impl LenExt for f64 {
    fn mm(self) -> Len {
        Len::new(self)
    }
}

/// Lengths of the two cables, from the carriage to the pulleys.
///
/// Measured in millimeters. Both lengths are always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CableLengths {
    pub a: Len,
    pub b: Len,
}

/// The position of the stepper motors, measured in number of steps.
///
/// Zero corresponds to a cable length of zero, and increasing values
/// correspond to longer cables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StepperPositions {
    pub a: i32,
    pub b: i32,
}

pub struct ConfigBuilder {
    pulley_distance: Len,
    pulley_radius: Len,
    steps_per_revolution: f64,
    microstep_resolution: f64,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            pulley_distance: 1800.0.mm(),
            pulley_radius: 6.3662.mm(),
            steps_per_revolution: 200.0,
            microstep_resolution: 16.0,
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> Config {
        let circumference = self.pulley_radius.get() * 2.0 * PI;
        let mm_per_step =
            circumference / self.steps_per_revolution / self.microstep_resolution;
        Config {
            pulley_distance: self.pulley_distance,
            pulley_radius: self.pulley_radius,
            steps_per_revolution: self.steps_per_revolution,
            microstep_resolution: self.microstep_resolution,
            steps_per_mm: 1.0 / mm_per_step,
        }
    }

    pub fn with_pulley_distance(&mut self, d: Len) -> &mut Self {
        self.pulley_distance = d;
        self
    }

    pub fn with_pulley_radius(&mut self, r: Len) -> &mut Self {
        self.pulley_radius = r;
        self
    }

    pub fn with_steps_per_revolution(&mut self, steps: f64) -> &mut Self {
        self.steps_per_revolution = steps;
        self
    }

    pub fn with_microstep_resolution(&mut self, microsteps: f64) -> &mut Self {
        self.microstep_resolution = microsteps;
        self
    }
}

/// The geometric configuration of a v-plotter.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// The horizontal distance between the two pulleys, in millimeters.
    pub pulley_distance: Len,
    /// The radius of the pulleys that the cable winds around.
    pub pulley_radius: Len,
    /// How many full stepper motor steps per pulley revolution?
    pub steps_per_revolution: f64,
    /// Microstepping factor of the driver board.
    pub microstep_resolution: f64,

    // Derived from the fields above in `ConfigBuilder::build`.
    pub steps_per_mm: f64,
}

impl Config {
    pub fn spool_circumference(&self) -> Len {
        self.pulley_radius * 2.0 * PI
    }

    pub fn mm_per_step(&self) -> f64 {
        1.0 / self.steps_per_mm
    }

    /// Inverse kinematics: cable lengths for a Cartesian point.
    ///
    /// Total for all inputs; each length is the Euclidean distance to a
    /// pulley, so the sums of squares under the roots are never negative.
    pub fn point_to_lengths(&self, p: &Point) -> CableLengths {
        let half = self.pulley_distance.get() / 2.0;
        let dxa = p.x - half;
        let dxb = p.x + half;
        let dy = p.y - half;
        CableLengths {
            a: sqrt(square(dxa) + square(dy)).mm(),
            b: sqrt(square(dxb) + square(dy)).mm(),
        }
    }

    /// Forward kinematics: Cartesian point for a pair of cable lengths.
    ///
    /// A pair read from the live step counters can momentarily lie outside
    /// the reachable triangle, which would drive the radicand negative; it is
    /// clamped at zero so this never produces NaN.
    ///
    /// Equation from: http://www.diale.org/vbot.html
    pub fn lengths_to_point(&self, lengths: &CableLengths) -> Point {
        let d = self.pulley_distance.get();
        let a = lengths.a.get();
        let b = lengths.b.get();

        let sum_sq = square(b) + square(a);
        let diff_sq = square(b) - square(a);

        let x = diff_sq / (2.0 * d);
        let radicand = sum_sq - square(d) / 2.0 - square(diff_sq) / (2.0 * square(d));
        let y = d / 2.0 - FRAC_1_SQRT_2 * sqrt(radicand.max(0.0));
        Point::new(x, y)
    }

    /// Cable lengths at the cold-start position: the carriage hanging on the
    /// machine diagonal, both cables at `D * sqrt(2) / 2`.
    pub fn home_lengths(&self) -> CableLengths {
        let l = self.pulley_distance.get() * SQRT_2 / 2.0;
        CableLengths { a: l.mm(), b: l.mm() }
    }

    pub fn lengths_to_steps(&self, lengths: &CableLengths) -> StepperPositions {
        StepperPositions {
            a: round(lengths.a.get() * self.steps_per_mm) as i32,
            b: round(lengths.b.get() * self.steps_per_mm) as i32,
        }
    }

    pub fn steps_to_lengths(&self, steps: &StepperPositions) -> CableLengths {
        CableLengths {
            a: (steps.a as f64 * self.mm_per_step()).mm(),
            b: (steps.b as f64 * self.mm_per_step()).mm(),
        }
    }

    pub fn point_to_steps(&self, p: &Point) -> StepperPositions {
        self.lengths_to_steps(&self.point_to_lengths(p))
    }

    pub fn steps_to_point(&self, steps: &StepperPositions) -> Point {
        self.lengths_to_point(&self.steps_to_lengths(steps))
    }
}
