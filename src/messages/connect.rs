//! Connection and attachment messages
//!
//! `op_connect` negotiates the protocol version, `op_attach` / `op_create`
//! open the database with a database parameter block (DPB), `op_detach` and
//! `op_disconnect` tear the attachment and the socket down.

use bytes::Bytes;

use crate::buffer::{ParamBuffer, WriteBuffer};
use crate::config::Config;
use crate::constants::{dpb, protocol, Operation};
use crate::error::Result;

/// `op_connect` request offering every supported protocol version
#[derive(Debug)]
pub(crate) struct ConnectMessage<'a> {
    database: &'a str,
    user: &'a str,
    host: &'a str,
}

impl<'a> ConnectMessage<'a> {
    pub(crate) fn new(database: &'a str, user: &'a str, host: &'a str) -> Self {
        Self {
            database,
            user,
            host,
        }
    }

    /// User identification block (cnct tags)
    fn user_identification(&self) -> Result<Vec<u8>> {
        let mut uid = ParamBuffer::default();
        uid.add_string(protocol::CNCT_USER, self.user)?;
        uid.add_string(protocol::CNCT_HOST, self.host)?;
        uid.add_tag(protocol::CNCT_USER_VERIFICATION).add_tag(0);
        Ok(uid.into_vec())
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let mut buf = WriteBuffer::new();
        buf.write_u32(Operation::Connect as u32);
        buf.write_u32(Operation::Attach as u32);
        buf.write_u32(protocol::CONNECT_VERSION2);
        buf.write_u32(protocol::ARCHITECTURE_GENERIC);
        buf.write_string(self.database)?;
        buf.write_u32(protocol::OFFERED.len() as u32);
        buf.write_opaque(&self.user_identification()?)?;
        for (version, architecture, min_type, max_type, weight) in protocol::OFFERED {
            buf.write_u32(version);
            buf.write_u32(architecture);
            buf.write_u32(min_type);
            buf.write_u32(max_type);
            buf.write_u32(weight);
        }
        Ok(buf.freeze())
    }
}

/// `op_attach` / `op_create` request
#[derive(Debug)]
pub(crate) struct AttachMessage<'a> {
    config: &'a Config,
    create: bool,
}

impl<'a> AttachMessage<'a> {
    pub(crate) fn attach(config: &'a Config) -> Self {
        Self {
            config,
            create: false,
        }
    }

    pub(crate) fn create(config: &'a Config) -> Self {
        Self {
            config,
            create: true,
        }
    }

    /// Database parameter block for this attachment
    pub(crate) fn dpb(&self) -> Result<Vec<u8>> {
        let config = self.config;
        let mut block = ParamBuffer::with_version(dpb::VERSION1);
        block.add_string(dpb::USER_NAME, &config.user)?;
        block.add_string(dpb::PASSWORD, &config.password)?;
        block.add_string(dpb::LC_CTYPE, &config.charset)?;
        if let Some(role) = &config.role {
            block.add_string(dpb::SQL_ROLE_NAME, role)?;
        }
        block.add_int(dpb::SQL_DIALECT, config.dialect);
        if self.create {
            block.add_string(dpb::SET_DB_CHARSET, &config.charset)?;
            if let Some(page_size) = config.page_size {
                block.add_int(dpb::PAGE_SIZE, page_size);
            }
        }
        Ok(block.into_vec())
    }

    pub(crate) fn build_request(&self) -> Result<Bytes> {
        let op = if self.create {
            Operation::Create
        } else {
            Operation::Attach
        };
        let mut buf = WriteBuffer::new();
        buf.write_u32(op as u32);
        buf.write_u32(0); // database object id
        buf.write_string(&self.config.database)?;
        buf.write_opaque(&self.dpb()?)?;
        Ok(buf.freeze())
    }
}

/// `op_detach` request
#[derive(Debug)]
pub(crate) struct DetachMessage {
    database: u32,
}

impl DetachMessage {
    pub(crate) fn new(database: u32) -> Self {
        Self { database }
    }

    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(8);
        buf.write_u32(Operation::Detach as u32);
        buf.write_u32(self.database);
        buf.freeze()
    }
}

/// `op_disconnect` request; the server closes the socket without replying
#[derive(Debug, Default)]
pub(crate) struct DisconnectMessage;

impl DisconnectMessage {
    pub(crate) fn build_request(&self) -> Bytes {
        let mut buf = WriteBuffer::with_capacity(4);
        buf.write_u32(Operation::Disconnect as u32);
        buf.freeze()
    }
}
