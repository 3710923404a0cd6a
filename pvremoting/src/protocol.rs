// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Protobuf messages for over-the-wire payloads between processes. The payload of an
//! RMI is owned by its handler; these are the formats of the built-in handlers.
//! Encoded and decoded with [prost].
//!
//! The script-execution RMI is the exception: its payload is a plain UTF-8 command
//! string.

/// A property value
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PropertyValueMessage {
    /// The value, by kind
    #[prost(oneof = "property_value_message::Value", tags = "1, 2, 3, 4, 5")]
    pub value: Option<property_value_message::Value>,
}

/// Nested types of [PropertyValueMessage]
pub mod property_value_message {
    /// The kinds of property values
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        /// An integer
        #[prost(int64, tag = "1")]
        Integer(i64),
        /// A floating point number
        #[prost(double, tag = "2")]
        Number(f64),
        /// A string
        #[prost(string, tag = "3")]
        Text(::prost::alloc::string::String),
        /// An array of numbers
        #[prost(message, tag = "4")]
        Numbers(super::DoubleArray),
        /// References to other proxies
        #[prost(message, tag = "5")]
        Proxies(super::ProxyIdArray),
    }
}

/// An array of doubles
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DoubleArray {
    /// The values
    #[prost(double, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f64>,
}

/// An array of proxy ids
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProxyIdArray {
    /// The ids
    #[prost(uint64, repeated, tag = "1")]
    pub ids: ::prost::alloc::vec::Vec<u64>,
}

/// A named property value
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PropertyEntry {
    /// The property name
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// The property value
    #[prost(message, optional, tag = "2")]
    pub value: Option<PropertyValueMessage>,
}

/// Register a mirror for a proxy
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateMirror {
    /// The proxy's id
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// The proxy's type tag
    #[prost(string, tag = "2")]
    pub type_tag: ::prost::alloc::string::String,
}

/// Apply property values to a mirror
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateMirror {
    /// The proxy's id
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// The properties which changed since the last synchronization
    #[prost(message, repeated, tag = "2")]
    pub properties: ::prost::alloc::vec::Vec<PropertyEntry>,
}

/// Drop a mirror
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteMirror {
    /// The proxy's id
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

/// Information about one plugin
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PluginRecordMessage {
    /// Plugin name
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Plugin file path
    #[prost(string, tag = "2")]
    pub file_name: ::prost::alloc::string::String,
    /// Plugin version
    #[prost(string, tag = "3")]
    pub version: ::prost::alloc::string::String,
    /// Is the plugin loaded
    #[prost(bool, tag = "4")]
    pub loaded: bool,
    /// Must the plugin be loaded on the client too
    #[prost(bool, tag = "5")]
    pub required_on_client: bool,
    /// Must the plugin be loaded on the server too
    #[prost(bool, tag = "6")]
    pub required_on_server: bool,
    /// Names of plugins this plugin needs
    #[prost(string, repeated, tag = "7")]
    pub required_plugins: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    /// Free-text description
    #[prost(string, tag = "8")]
    pub description: ::prost::alloc::string::String,
    /// Should the plugin be loaded on startup
    #[prost(bool, tag = "9")]
    pub auto_load: bool,
    /// Requirement status, empty when satisfied
    #[prost(string, tag = "10")]
    pub status_message: ::prost::alloc::string::String,
}

/// The plugins of one process
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PluginsInformationMessage {
    /// Plugin search paths
    #[prost(string, tag = "1")]
    pub search_paths: ::prost::alloc::string::String,
    /// The plugins
    #[prost(message, repeated, tag = "2")]
    pub plugins: ::prost::alloc::vec::Vec<PluginRecordMessage>,
}

/// The kinds of information a process can be asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InformationKind {
    /// The process's [crate::PluginsInformation]
    Plugins = 0,
    /// The process's local data ([DataInformation])
    Data = 1,
}

/// Ask a process for information. The reply is sent point-to-point back to the
/// requesting rank on `reply_tag`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InformationRequest {
    /// What to gather
    #[prost(enumeration = "InformationKind", tag = "1")]
    pub kind: i32,
    /// The message tag of the reply
    #[prost(uint32, tag = "2")]
    pub reply_tag: u32,
}

/// Summary of a process's local data
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataInformation {
    /// Number of cells held locally
    #[prost(uint64, tag = "1")]
    pub number_of_cells: u64,
    /// Number of points over all local cells
    #[prost(uint64, tag = "2")]
    pub number_of_points: u64,
}

/// Ask the workers to redistribute their local data
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RedistributeRequest {
    /// One weight per worker; empty means a balanced distribution
    #[prost(double, repeated, tag = "1")]
    pub weights: ::prost::alloc::vec::Vec<f64>,
}

/// One polygonal cell
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CellMessage {
    /// The cell's global id
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Flattened xyz coordinates of the cell's points
    #[prost(double, repeated, tag = "2")]
    pub points: ::prost::alloc::vec::Vec<f64>,
}

/// A batch of cells moving between processes
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CellBatch {
    /// The cells, in the donor's order
    #[prost(message, repeated, tag = "1")]
    pub cells: ::prost::alloc::vec::Vec<CellMessage>,
}
