//! Statement info parsing
//!
//! `op_prepare_statement` and `op_info_sql` answer with an info buffer: a
//! sequence of one-byte tags, most followed by a little-endian u16 length and
//! a value. The describe part lists every output column (`isc_info_sql_select`)
//! and input parameter (`isc_info_sql_bind`). When the buffer is too small the
//! server ends it with `isc_info_truncated` and the client asks for the rest,
//! starting at a given descriptor index.

use crate::buffer::ReadBuffer;
use crate::constants::info;
use crate::error::{Error, Result};
use crate::statement::ColumnInfo;

/// Items requested at prepare time
pub(crate) fn describe_items(want_plan: bool) -> Vec<u8> {
    let mut items = vec![info::SQL_STMT_TYPE];
    if want_plan {
        items.push(info::SQL_GET_PLAN);
    }
    items.push(info::SQL_SELECT);
    items.extend_from_slice(&info::DESCRIBE_VARS);
    items.push(info::SQL_BIND);
    items.extend_from_slice(&info::DESCRIBE_VARS);
    items
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum List {
    Select,
    Bind,
}

impl List {
    fn tag(self) -> u8 {
        match self {
            List::Select => info::SQL_SELECT,
            List::Bind => info::SQL_BIND,
        }
    }
}

/// Statement description accumulated over one or more info buffers
#[derive(Debug, Default)]
pub(crate) struct DescribeInfo {
    pub(crate) statement_type: u32,
    pub(crate) plan: Option<String>,
    pub(crate) outputs: Vec<ColumnInfo>,
    pub(crate) inputs: Vec<ColumnInfo>,
    select_seen: bool,
    bind_seen: bool,
    /// Highest descriptor index fully received, per list
    select_done: usize,
    bind_done: usize,
}

impl DescribeInfo {
    fn vars(&mut self, list: List) -> &mut Vec<ColumnInfo> {
        match list {
            List::Select => &mut self.outputs,
            List::Bind => &mut self.inputs,
        }
    }

    fn column(&mut self, list: Option<List>, index: usize) -> Result<&mut ColumnInfo> {
        let list = list.ok_or_else(|| Error::Protocol("describe item outside a list".into()))?;
        let vars = self.vars(list);
        let len = vars.len();
        index
            .checked_sub(1)
            .and_then(move |i| vars.get_mut(i))
            .ok_or_else(|| {
                Error::Protocol(format!("descriptor index {} out of range 1..={}", index, len))
            })
    }

    /// Merge one info buffer
    ///
    /// Returns the items to send with `op_info_sql` while part of the
    /// description is still missing.
    pub(crate) fn parse(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut buf = ReadBuffer::from_slice(data);
        let mut list: Option<List> = None;
        let mut index = 0usize;
        loop {
            if !buf.has_remaining(1) {
                return Err(Error::Protocol("statement info ended without isc_info_end".into()));
            }
            match buf.read_u8()? {
                info::END | info::TRUNCATED => return Ok(self.continuation()),
                info::SQL_STMT_TYPE => self.statement_type = buf.read_info_int()? as u32,
                info::SQL_GET_PLAN => {
                    let plan = buf.read_info_string()?;
                    self.plan = Some(plan.trim().to_string());
                }
                info::SQL_SELECT => {
                    list = Some(List::Select);
                    self.select_seen = true;
                }
                info::SQL_BIND => {
                    list = Some(List::Bind);
                    self.bind_seen = true;
                }
                info::SQL_DESCRIBE_VARS => {
                    let count = buf.read_info_int()?;
                    let count = usize::try_from(count).map_err(|_| {
                        Error::Protocol(format!("negative descriptor count {}", count))
                    })?;
                    let current =
                        list.ok_or_else(|| Error::Protocol("describe_vars outside a list".into()))?;
                    self.vars(current).resize_with(count, ColumnInfo::default);
                }
                info::SQL_SQLDA_SEQ => index = buf.read_info_int()? as usize,
                info::SQL_TYPE => {
                    let raw = buf.read_info_int()?;
                    let column = self.column(list, index)?;
                    column.sql_type = (raw & !1) as u16;
                    column.nullable = raw & 1 != 0;
                }
                info::SQL_SUB_TYPE => {
                    let value = buf.read_info_int()?;
                    self.column(list, index)?.subtype = value as i16;
                }
                info::SQL_SCALE => {
                    let value = buf.read_info_int()?;
                    self.column(list, index)?.scale = value as i16;
                }
                info::SQL_LENGTH => {
                    let value = buf.read_info_int()?;
                    self.column(list, index)?.length = value as u16;
                }
                info::SQL_NULL_IND => {
                    buf.read_info_int()?;
                }
                info::SQL_FIELD => {
                    let value = buf.read_info_string()?;
                    self.column(list, index)?.field = value;
                }
                info::SQL_RELATION => {
                    let value = buf.read_info_string()?;
                    self.column(list, index)?.relation = value;
                }
                info::SQL_OWNER => {
                    let value = buf.read_info_string()?;
                    self.column(list, index)?.owner = value;
                }
                info::SQL_ALIAS => {
                    let value = buf.read_info_string()?;
                    self.column(list, index)?.alias = value;
                }
                info::SQL_DESCRIBE_END => match list {
                    Some(List::Select) => self.select_done = index,
                    Some(List::Bind) => self.bind_done = index,
                    None => return Err(Error::Protocol("describe_end outside a list".into())),
                },
                other => {
                    return Err(Error::Protocol(format!("unexpected statement info item {}", other)))
                }
            }
        }
    }

    fn continuation(&self) -> Option<Vec<u8>> {
        let (list, start) = if !self.select_seen || self.select_done < self.outputs.len() {
            (List::Select, self.select_done + 1)
        } else if !self.bind_seen || self.bind_done < self.inputs.len() {
            (List::Bind, self.bind_done + 1)
        } else {
            return None;
        };
        tracing::debug!(list = ?list, start = start, "statement info truncated, continuing");
        let start = start as u16;
        let mut items = vec![info::SQL_SQLDA_START];
        items.extend_from_slice(&2u16.to_le_bytes());
        items.extend_from_slice(&start.to_le_bytes());
        items.push(list.tag());
        items.extend_from_slice(&info::DESCRIBE_VARS);
        Some(items)
    }
}

/// Row counts reported by `isc_info_sql_records`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordCounts {
    pub(crate) selected: u64,
    pub(crate) inserted: u64,
    pub(crate) updated: u64,
    pub(crate) deleted: u64,
}

impl RecordCounts {
    /// Parse the reply to an `isc_info_sql_records` request
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut counts = RecordCounts::default();
        let mut buf = ReadBuffer::from_slice(data);
        while buf.has_remaining(1) {
            match buf.read_u8()? {
                info::END => break,
                info::SQL_RECORDS => {
                    let len = buf.read_u16_le()? as usize;
                    let end = buf.position() + len;
                    while buf.position() < end {
                        let item = buf.read_u8()?;
                        if item == info::END {
                            break;
                        }
                        let value = buf.read_info_int()?.max(0) as u64;
                        match item {
                            info::REQ_SELECT_COUNT => counts.selected = value,
                            info::REQ_INSERT_COUNT => counts.inserted = value,
                            info::REQ_UPDATE_COUNT => counts.updated = value,
                            info::REQ_DELETE_COUNT => counts.deleted = value,
                            _ => {}
                        }
                    }
                }
                other => {
                    return Err(Error::Protocol(format!("unexpected records info item {}", other)))
                }
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{sql_type, stmt_type};

    fn int_item(out: &mut Vec<u8>, tag: u8, value: i32) {
        out.push(tag);
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn str_item(out: &mut Vec<u8>, tag: u8, value: &str) {
        out.push(tag);
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn column(out: &mut Vec<u8>, seq: i32, ty: u16, alias: &str) {
        int_item(out, info::SQL_SQLDA_SEQ, seq);
        int_item(out, info::SQL_TYPE, ty as i32 + 1);
        int_item(out, info::SQL_SUB_TYPE, 0);
        int_item(out, info::SQL_SCALE, 0);
        int_item(out, info::SQL_LENGTH, 4);
        int_item(out, info::SQL_NULL_IND, 0);
        str_item(out, info::SQL_FIELD, alias);
        str_item(out, info::SQL_RELATION, "PEOPLE");
        str_item(out, info::SQL_OWNER, "SYSDBA");
        str_item(out, info::SQL_ALIAS, alias);
        out.push(info::SQL_DESCRIBE_END);
    }

    #[test]
    fn test_describe_items() {
        let items = describe_items(true);
        assert_eq!(&items[..3], &[info::SQL_STMT_TYPE, info::SQL_GET_PLAN, info::SQL_SELECT]);
        assert_eq!(items.len(), 3 + 12 + 1 + 12);
    }

    #[test]
    fn test_parse_complete_buffer() {
        let mut data = Vec::new();
        int_item(&mut data, info::SQL_STMT_TYPE, stmt_type::SELECT as i32);
        str_item(&mut data, info::SQL_GET_PLAN, "\nPLAN (PEOPLE NATURAL)");
        data.push(info::SQL_SELECT);
        int_item(&mut data, info::SQL_DESCRIBE_VARS, 2);
        column(&mut data, 1, sql_type::LONG, "ID");
        column(&mut data, 2, sql_type::VARYING, "NAME");
        data.push(info::SQL_BIND);
        int_item(&mut data, info::SQL_DESCRIBE_VARS, 1);
        column(&mut data, 1, sql_type::LONG, "ID");
        data.push(info::END);

        let mut describe = DescribeInfo::default();
        assert!(describe.parse(&data).unwrap().is_none());
        assert_eq!(describe.statement_type, stmt_type::SELECT);
        assert_eq!(describe.plan.as_deref(), Some("PLAN (PEOPLE NATURAL)"));
        assert_eq!(describe.outputs.len(), 2);
        assert_eq!(describe.outputs[1].alias, "NAME");
        assert_eq!(describe.outputs[1].sql_type, sql_type::VARYING);
        assert!(describe.outputs[1].nullable);
        assert_eq!(describe.outputs[0].relation, "PEOPLE");
        assert_eq!(describe.inputs.len(), 1);
    }

    #[test]
    fn test_truncated_buffer_requests_continuation() {
        let mut first = Vec::new();
        int_item(&mut first, info::SQL_STMT_TYPE, stmt_type::SELECT as i32);
        first.push(info::SQL_SELECT);
        int_item(&mut first, info::SQL_DESCRIBE_VARS, 2);
        column(&mut first, 1, sql_type::LONG, "A");
        int_item(&mut first, info::SQL_SQLDA_SEQ, 2);
        first.push(info::TRUNCATED);

        let mut describe = DescribeInfo::default();
        let items = describe.parse(&first).unwrap().unwrap();
        assert_eq!(
            &items[..7],
            &[info::SQL_SQLDA_START, 2, 0, 2, 0, info::SQL_SELECT, info::SQL_DESCRIBE_VARS]
        );

        let mut second = Vec::new();
        second.push(info::SQL_SELECT);
        int_item(&mut second, info::SQL_DESCRIBE_VARS, 2);
        column(&mut second, 2, sql_type::LONG, "B");
        second.push(info::TRUNCATED);
        let items = describe.parse(&second).unwrap().unwrap();
        assert_eq!(&items[..6], &[info::SQL_SQLDA_START, 2, 0, 1, 0, info::SQL_BIND]);

        let mut third = Vec::new();
        third.push(info::SQL_BIND);
        int_item(&mut third, info::SQL_DESCRIBE_VARS, 0);
        third.push(info::END);
        assert!(describe.parse(&third).unwrap().is_none());

        let aliases: Vec<_> = describe.outputs.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases, ["A", "B"]);
        assert!(describe.inputs.is_empty());
    }

    #[test]
    fn test_bad_index_is_protocol_error() {
        let mut data = Vec::new();
        data.push(info::SQL_SELECT);
        int_item(&mut data, info::SQL_DESCRIBE_VARS, 1);
        int_item(&mut data, info::SQL_SQLDA_SEQ, 3);
        int_item(&mut data, info::SQL_TYPE, 497);
        let err = DescribeInfo::default().parse(&data).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_record_counts() {
        let mut inner = Vec::new();
        int_item(&mut inner, info::REQ_UPDATE_COUNT, 3);
        int_item(&mut inner, info::REQ_INSERT_COUNT, 1);
        inner.push(info::END);
        let mut data = vec![info::SQL_RECORDS];
        data.extend_from_slice(&(inner.len() as u16).to_le_bytes());
        data.extend(inner);
        data.push(info::END);

        let counts = RecordCounts::parse(&data).unwrap();
        assert_eq!(counts.updated, 3);
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.deleted, 0);
    }
}
