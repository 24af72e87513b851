#[macro_use]
extern crate uom;

use core::fmt;

use serde::{Deserialize, Serialize};

/// encapsulate the stable string names in custom structs to let the
/// compiler differentiate them
macro_rules! impl_name_encapsulation {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name {
            name: String,
        }

        impl $name {
            #[inline(always)]
            pub fn as_str(&self) -> &str { &self.name }
        }

        impl Default for $name {
            fn default() -> Self { $name { name: String::new() } }
        }

        impl From<String> for $name {
            #[inline(always)]
            fn from(name: String) -> Self { $name { name } }
        }

        impl From<&str> for $name {
            #[inline(always)]
            fn from(name: &str) -> Self { $name { name: name.to_owned() } }
        }

        impl fmt::Display for $name {
            #[inline(always)]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.name)
            }
        }
    };
}

impl_name_encapsulation!(ServiceId);
impl_name_encapsulation!(NodeId);
impl_name_encapsulation!(ChainId);

impl ChainId {
    /// Chain ids are keyed by their endpoints, `"{source}-{sink}"`.
    pub fn for_endpoints(source: &ServiceId, sink: &ServiceId) -> Self {
        ChainId::from(format!("{}-{}", source, sink))
    }
}

pub mod domain;
pub mod dto;
