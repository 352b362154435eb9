//! Terraform resource addresses, e.g. `module.ocp_base.module.worker_pools["default"].ibm_container_vpc_worker_pool.pool[0]`.
//!
//! Exemption lists are written by hand, so every address goes through [`ResourceAddress::from_str`]
//! before a scenario may run. Only syntax is checked here: whether a resource really is indexed is
//! only known once terraform has planned it.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("resource address is empty")]
    Empty,
    #[error("malformed resource address `{address}` at offset {offset}: {reason}")]
    Malformed {
        address: String,
        offset: usize,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceKey {
    Index(u64),
    Key(String),
}

impl Display for InstanceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceKey::Index(index) => write!(f, "[{index}]"),
            InstanceKey::Key(key) => {
                let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "[\"{escaped}\"]")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleCall {
    pub name: String,
    pub key: Option<InstanceKey>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceMode {
    Managed,
    Data,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceAddress {
    module_path: Vec<ModuleCall>,
    mode: ResourceMode,
    resource_type: String,
    name: String,
    key: Option<InstanceKey>,
}

impl ResourceAddress {
    pub fn module_path(&self) -> &[ModuleCall] {
        &self.module_path
    }

    pub fn mode(&self) -> ResourceMode {
        self.mode
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> Option<&InstanceKey> {
        self.key.as_ref()
    }
}

impl Display for ResourceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for module in &self.module_path {
            write!(f, "module.{}", module.name)?;
            if let Some(key) = &module.key {
                write!(f, "{key}")?;
            }
            f.write_str(".")?;
        }
        if self.mode == ResourceMode::Data {
            f.write_str("data.")?;
        }
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(AddressError::Empty);
        }

        Parser { input: s, pos: 0 }.parse()
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn parse(mut self) -> Result<ResourceAddress, AddressError> {
        let mut module_path = vec![];

        loop {
            let ident = self.identifier("module name or resource type")?;

            if ident == "module" {
                self.expect('.')?;
                let name = self.identifier("module name")?;
                let key = self.instance_key()?;
                module_path.push(ModuleCall { name, key });
                self.expect('.')?;
                continue;
            }

            let (mode, resource_type) = if ident == "data" {
                self.expect('.')?;
                (ResourceMode::Data, self.identifier("data source type")?)
            } else {
                (ResourceMode::Managed, ident)
            };

            self.expect('.')?;
            let name = self.identifier("resource name")?;
            let key = self.instance_key()?;

            if self.pos != self.input.len() {
                return Err(self.error("unexpected trailing characters"));
            }

            return Ok(ResourceAddress {
                module_path,
                mode,
                resource_type,
                name,
                key,
            });
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn error(&self, reason: &str) -> AddressError {
        AddressError::Malformed {
            address: self.input.to_string(),
            offset: self.pos,
            reason: reason.to_string(),
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), AddressError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += c.len_utf8();
                Ok(())
            }
            Some(c) => Err(self.error(&format!("expected `{expected}`, found `{c}`"))),
            None => Err(self.error(&format!("expected `{expected}`, found end of address"))),
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String, AddressError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.pos += 1,
            _ => return Err(self.error(&format!("expected {what}"))),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                self.pos += 1;
            } else {
                break;
            }
        }

        Ok(self.input[start..self.pos].to_string())
    }

    fn instance_key(&mut self) -> Result<Option<InstanceKey>, AddressError> {
        if self.peek() != Some('[') {
            return Ok(None);
        }
        self.pos += 1;

        let key = match self.peek() {
            Some('"') => InstanceKey::Key(self.quoted()?),
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let index = self.input[start..self.pos]
                    .parse::<u64>()
                    .map_err(|_| self.error("instance index out of range"))?;
                InstanceKey::Index(index)
            }
            Some(']') => return Err(self.error("missing instance key")),
            Some(_) => return Err(self.error("instance key must be an integer or a quoted string")),
            None => return Err(self.error("unterminated instance key")),
        };

        self.expect(']')?;
        Ok(Some(key))
    }

    fn quoted(&mut self) -> Result<String, AddressError> {
        // opening quote
        self.pos += 1;
        let mut value = String::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string key"));
            };
            self.pos += c.len_utf8();

            match c {
                '"' => return Ok(value),
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("unterminated escape sequence"));
                    };
                    self.pos += escaped.len_utf8();
                    value.push(escaped);
                }
                c => value.push(c),
            }
        }
    }
}
