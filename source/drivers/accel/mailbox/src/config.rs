// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: TOML description of mailbox apertures and channel geometry
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 unit tests; tests/config.rs
//!
//! FORMAT:
//! ```toml
//! [mailbox]
//! ringbuf_base = 0x40000
//! mbox_base = 0x1000
//!
//! [[channel]]
//! name = "mgmt"
//! irq = 3
//! iohub_int_addr = 0x40
//! x2i = { rb_start_addr = 0x0, rb_size = 0x1000, mb_head_ptr_reg = 0x0, mb_tail_ptr_reg = 0x4 }
//! i2x = { rb_start_addr = 0x1000, rb_size = 0x1000, mb_head_ptr_reg = 0x8, mb_tail_ptr_reg = 0xc }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::ring::{ChannelRes, MailboxRes};
use crate::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub name: String,
    pub irq: u32,
    pub iohub_int_addr: u32,
    pub x2i: ChannelRes,
    pub i2x: ChannelRes,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MailboxConfig {
    pub mailbox: MailboxRes,
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelConfig>,
}

impl MailboxConfig {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|source| Error::ConfigRead { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&data)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [mailbox]
        ringbuf_base = 0x40000
        mbox_base = 0x1000

        [[channel]]
        name = "mgmt"
        irq = 3
        iohub_int_addr = 0x40
        x2i = { rb_start_addr = 0x0, rb_size = 0x1000, mb_head_ptr_reg = 0x0, mb_tail_ptr_reg = 0x4 }
        i2x = { rb_start_addr = 0x1000, rb_size = 0x1000, mb_head_ptr_reg = 0x8, mb_tail_ptr_reg = 0xc }
    "#;

    #[test]
    fn parses_mailbox_and_channels() {
        let cfg = MailboxConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.mailbox.ringbuf_base, 0x40000);
        assert_eq!(cfg.mailbox.ringbuf_size, 0);
        assert_eq!(cfg.channels.len(), 1);
        let mgmt = cfg.channel("mgmt").unwrap();
        assert_eq!(mgmt.irq, 3);
        assert_eq!(mgmt.i2x.mb_tail_ptr_reg, 0xc);
        assert!(cfg.channel("user").is_none());
    }

    #[test]
    fn channels_are_optional() {
        let cfg = MailboxConfig::from_toml_str("[mailbox]\nringbuf_base = 0\nmbox_base = 0\n").unwrap();
        assert!(cfg.channels.is_empty());
    }

    #[test]
    fn missing_field_is_parse_error() {
        let err = MailboxConfig::from_toml_str("[mailbox]\nmbox_base = 0\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
