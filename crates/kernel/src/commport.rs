// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Commports: typed rendezvous queues between actors.
//!
//! A commport is a FIFO of boxed messages owned (for timing purposes) by
//! the host of the actor that created it. Sends charge network time from
//! the sender's host; receives block until a message or timeout. Message
//! types are downcast on receipt, mirroring the request/answer protocol
//! structs each service defines.

use gantry_core::HostName;
use smol_str::SmolStr;
use std::any::Any;

/// Anything that can travel through a commport.
///
/// Blanket-implemented for every `Debug + 'static` type; services define
/// plain structs/enums per protocol message.
pub trait Message: std::fmt::Debug + Any {
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: std::fmt::Debug + Any> Message for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A received message, not yet downcast.
#[derive(Debug)]
pub struct AnyMessage(Box<dyn Message>);

impl AnyMessage {
    pub fn new(msg: impl Message) -> Self {
        AnyMessage(Box::new(msg))
    }

    pub(crate) fn from_boxed(msg: Box<dyn Message>) -> Self {
        AnyMessage(msg)
    }

    /// The concrete type name, for logs and unexpected-message errors.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    /// Downcast to `M`, giving the message back on mismatch.
    pub fn downcast<M: Message>(self) -> Result<M, AnyMessage> {
        if self.is::<M>() {
            match self.0.into_any().downcast::<M>() {
                Ok(m) => Ok(*m),
                // Checked by is::<M> just above.
                Err(_) => unreachable!("downcast checked by is::<M>"),
            }
        } else {
            Err(self)
        }
    }

    pub fn is<M: Message>(&self) -> bool {
        self.0.as_any().is::<M>()
    }
}

/// Index of a commport inside the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) usize);

/// Handle to a commport. Cheap to clone; handles are how services hand
/// out reply addresses.
#[derive(Debug, Clone)]
pub struct Commport {
    pub(crate) id: PortId,
    pub(crate) name: SmolStr,
    pub(crate) owner_host: HostName,
}

impl Commport {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_host(&self) -> &HostName {
        &self.owner_host
    }
}

impl std::fmt::Display for Commport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
#[path = "commport_tests.rs"]
mod tests;
