use std::fmt;

use super::gravity::MPS_TO_MPH;
use crate::runtime::Address;

/// A request to compute the velocity of a falling object.
#[derive(Debug)]
pub struct DropRequest {
    /// Where to send the reply.
    pub reply_to: Address<DropReply>,

    /// Body symbol, such as `earth`.
    pub body: String,

    /// Fall distance, in meters.
    pub distance: f64,
}

/// A computed fall velocity, in meters per second.
#[derive(Clone, Debug, PartialEq)]
pub struct DropReply {
    /// Body symbol from the request.
    pub body: String,

    /// Fall distance from the request, in meters.
    pub distance: f64,

    /// Velocity at impact, in meters per second.
    pub velocity: f64,
}

impl DropReply {
    /// Converts this reply into a report in miles per hour.
    pub fn into_report(self) -> DropReport {
        DropReport {
            body: self.body,
            distance: self.distance,
            velocity_mph: self.velocity * MPS_TO_MPH,
        }
    }
}

/// A fall velocity as delivered to the sink, in miles per hour.
#[derive(Clone, Debug, PartialEq)]
pub struct DropReport {
    /// Body symbol from the request.
    pub body: String,

    /// Fall distance from the request, in meters.
    pub distance: f64,

    /// Velocity at impact, in miles per hour.
    pub velocity_mph: f64,
}

impl fmt::Display for DropReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "On {}, a fall of {} meters yields a velocity of {} mph.",
            self.body, self.distance, self.velocity_mph
        )
    }
}
