//! Declarative plausibility rules for block identifiers.
//!
//! A [`SchemaValidator`] answers one question for the recovery engine: could
//! `(identifier, length)` have been written by a real producer?  Checks run
//! strictly in order and stop at the first failure:
//!
//! 1. class ID known, else [`Status::BadClassId`]
//! 2. major version allowed for the class, else [`Status::BadMajorVersion`]
//! 3. minor version allowed for the class, else [`Status::BadMinorVersion`]
//! 4. data ID known within the class, else [`Status::BadDataId`]
//! 5. payload length satisfies the data ID's rule, else [`Status::BadPayloadLength`]
//!
//! Identifier repair depends on this order: it re-reads the first field that
//! failed and everything after it.
//!
//! The process-wide validator is set once, before the first recovery, with
//! [`SchemaValidator::install`].  Without an install it falls back to
//! [`SchemaValidator::builtin`], which knows only the system marker class.

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use crate::block::{BlockId, SystemMarker, SYSTEM_CLASS_ID, SYSTEM_MAJOR_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadClassId,
    BadMajorVersion,
    BadMinorVersion,
    BadDataId,
    BadPayloadLength,
}

impl Status {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRule {
    Any,
    Exact(u8),
    Range(RangeInclusive<u8>),
    OneOf(Vec<u8>),
}

impl VersionRule {
    pub fn allows(&self, version: u8) -> bool {
        match self {
            VersionRule::Any          => true,
            VersionRule::Exact(v)     => *v == version,
            VersionRule::Range(r)     => r.contains(&version),
            VersionRule::OneOf(list)  => list.contains(&version),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthRule {
    Any,
    Exact(u32),
    AtLeast(u32),
}

impl LengthRule {
    pub fn allows(&self, length: u32) -> bool {
        match *self {
            LengthRule::Any        => true,
            LengthRule::Exact(n)   => length == n,
            LengthRule::AtLeast(n) => length >= n,
        }
    }
}

/// Rules for one class ID.
#[derive(Debug, Clone)]
pub struct ClassRule {
    pub class_id: u16,
    pub major:    VersionRule,
    pub minor:    VersionRule,
    pub data:     HashMap<u16, LengthRule>,
}

impl ClassRule {
    pub fn new(class_id: u16) -> Self {
        Self {
            class_id,
            major: VersionRule::Any,
            minor: VersionRule::Any,
            data:  HashMap::new(),
        }
    }

    pub fn major(mut self, rule: VersionRule) -> Self {
        self.major = rule;
        self
    }

    pub fn minor(mut self, rule: VersionRule) -> Self {
        self.minor = rule;
        self
    }

    pub fn data(mut self, data_id: u16, length: LengthRule) -> Self {
        self.data.insert(data_id, length);
        self
    }
}

static GLOBAL: OnceCell<SchemaValidator> = OnceCell::new();

#[derive(Debug, Clone, Default)]
pub struct SchemaValidator {
    classes: HashMap<u16, ClassRule>,
}

impl SchemaValidator {
    /// A validator that knows no classes.
    pub fn new() -> Self {
        Self::default()
    }

    /// The system marker class: version 1.x, zero-length records only.
    pub fn builtin() -> Self {
        let mut rule = ClassRule::new(SYSTEM_CLASS_ID).major(VersionRule::Exact(SYSTEM_MAJOR_VERSION));
        for marker in SystemMarker::ALL {
            rule = rule.data(marker as u16, LengthRule::Exact(0));
        }
        Self::new().with_class(rule)
    }

    pub fn with_class(mut self, rule: ClassRule) -> Self {
        self.add_class(rule);
        self
    }

    /// Add or replace the rules for `rule.class_id`.
    pub fn add_class(&mut self, rule: ClassRule) {
        self.classes.insert(rule.class_id, rule);
    }

    pub fn knows_class(&self, class_id: u16) -> bool {
        self.classes.contains_key(&class_id)
    }

    pub fn check(&self, id: &BlockId, length: u32) -> Status {
        let Some(class) = self.classes.get(&id.class_id()) else {
            return Status::BadClassId;
        };
        if !class.major.allows(id.major_version()) {
            return Status::BadMajorVersion;
        }
        if !class.minor.allows(id.minor_version()) {
            return Status::BadMinorVersion;
        }
        match class.data.get(&id.data_id()) {
            None => Status::BadDataId,
            Some(rule) if !rule.allows(length) => Status::BadPayloadLength,
            Some(_) => Status::Ok,
        }
    }

    /// The process-wide validator.
    pub fn global() -> &'static SchemaValidator {
        GLOBAL.get_or_init(SchemaValidator::builtin)
    }

    /// Install the process-wide validator.  Fails, handing `validator` back,
    /// if one is already in place (including the lazily created default).
    pub fn install(validator: SchemaValidator) -> Result<(), SchemaValidator> {
        GLOBAL.set(validator)
    }
}
