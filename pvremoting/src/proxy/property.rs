// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Property values held in a proxy's property bag and mirrored remotely

use crate::errors::ControllerErr;
use crate::protocol::property_value_message::Value;
use crate::protocol::{DoubleArray, PropertyValueMessage, ProxyIdArray};

use super::ProxyId;

/// The value of one proxy property
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// An integer
    Integer(i64),
    /// A floating point number
    Number(f64),
    /// A string
    Text(String),
    /// An array of numbers
    Numbers(Vec<f64>),
    /// Non-owning references to other proxies. The referenced proxies cannot be
    /// deleted while this value is held by a live proxy.
    Proxies(Vec<ProxyId>),
}

impl PropertyValue {
    /// The proxies this value references
    pub fn referenced_proxies(&self) -> &[ProxyId] {
        match self {
            Self::Proxies(ids) => ids,
            _ => &[],
        }
    }

    pub(crate) fn to_message(&self) -> PropertyValueMessage {
        let value = match self {
            Self::Integer(v) => Value::Integer(*v),
            Self::Number(v) => Value::Number(*v),
            Self::Text(v) => Value::Text(v.clone()),
            Self::Numbers(values) => Value::Numbers(DoubleArray {
                values: values.clone(),
            }),
            Self::Proxies(ids) => Value::Proxies(ProxyIdArray {
                ids: ids.iter().map(|id| id.get()).collect(),
            }),
        };
        PropertyValueMessage { value: Some(value) }
    }

    pub(crate) fn from_message(message: PropertyValueMessage) -> Result<Self, ControllerErr> {
        match message.value {
            Some(Value::Integer(v)) => Ok(Self::Integer(v)),
            Some(Value::Number(v)) => Ok(Self::Number(v)),
            Some(Value::Text(v)) => Ok(Self::Text(v)),
            Some(Value::Numbers(array)) => Ok(Self::Numbers(array.values)),
            Some(Value::Proxies(array)) => Ok(Self::Proxies(
                array.ids.into_iter().map(ProxyId::from).collect(),
            )),
            None => Err(ControllerErr::MalformedPayload("property without a value")),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Numbers(value)
    }
}

impl From<ProxyId> for PropertyValue {
    fn from(value: ProxyId) -> Self {
        Self::Proxies(vec![value])
    }
}

impl From<Vec<ProxyId>> for PropertyValue {
    fn from(value: Vec<ProxyId>) -> Self {
        Self::Proxies(value)
    }
}
