// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Destination-filtered attribute collections.
//!
//! Every artifact shares one attribute collection per transaction, but each
//! artifact only sees the attributes whose destination mask includes it. An
//! attribute allowed on a trace may be excluded from an event; the filtering
//! contract is identical everywhere.

use std::borrow::Cow;
use std::fmt;

/// Destination bit for the transaction event.
pub const DEST_TRANSACTION_EVENT: u8 = 1 << 0;
/// Destination bit for the transaction trace.
pub const DEST_TRANSACTION_TRACE: u8 = 1 << 1;
/// Destination bit for the error trace.
pub const DEST_ERROR_TRACE: u8 = 1 << 2;
/// Destination bit for the error event.
pub const DEST_ERROR_EVENT: u8 = 1 << 3;
/// All destinations.
pub const DEST_ALL: u8 =
    DEST_TRANSACTION_EVENT | DEST_TRANSACTION_TRACE | DEST_ERROR_TRACE | DEST_ERROR_EVENT;
/// Error artifacts only.
pub const DEST_ERRORS: u8 = DEST_ERROR_TRACE | DEST_ERROR_EVENT;

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Str(Cow<'static, str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(value) => f.write_str(value),
            AttributeValue::Int(value) => write!(f, "{}", value),
            AttributeValue::Float(value) => write!(f, "{}", value),
            AttributeValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value.into())
    }
}

impl From<&'static str> for AttributeValue {
    fn from(value: &'static str) -> Self {
        AttributeValue::Str(value.into())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Which of the three attribute classes an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeClass {
    Intrinsic,
    Agent,
    User,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: Cow<'static, str>,
    pub value: AttributeValue,
    pub class: AttributeClass,
    pub destinations: u8,
}

/// The intrinsic + agent + user attributes of one finished transaction.
#[derive(Debug, Clone, Default)]
pub struct AttributeCollection {
    attributes: Vec<Attribute>,
}

impl AttributeCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_intrinsic(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<AttributeValue>,
        destinations: u8,
    ) {
        self.add(name, value, AttributeClass::Intrinsic, destinations);
    }

    pub fn add_agent(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<AttributeValue>,
        destinations: u8,
    ) {
        self.add(name, value, AttributeClass::Agent, destinations);
    }

    pub fn add_user(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<AttributeValue>,
        destinations: u8,
    ) {
        self.add(name, value, AttributeClass::User, destinations);
    }

    fn add(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: impl Into<AttributeValue>,
        class: AttributeClass,
        destinations: u8,
    ) {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
            class,
            destinations,
        });
    }

    /// All attributes applying to `destination`, regardless of class.
    pub fn for_destination(&self, destination: u8) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .filter(move |attribute| attribute.destinations & destination != 0)
    }

    /// Attributes of one class applying to `destination`, as name/value
    /// pairs ready for an artifact.
    pub fn class_for_destination(
        &self,
        class: AttributeClass,
        destination: u8,
    ) -> Vec<(Cow<'static, str>, AttributeValue)> {
        self.for_destination(destination)
            .filter(|attribute| attribute.class == class)
            .map(|attribute| (attribute.name.clone(), attribute.value.clone()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}
