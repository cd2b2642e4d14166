//! Just enough Thrift to speak to Jaeger: the `jaeger.thrift` batch model, the binary
//! protocol for the collector's http endpoint and the compact protocol for the agent's
//! udp `emitBatch`.

/// Field and element types, independent of protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `bool`
    Bool,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `string`, length-prefixed utf-8
    String,
    /// A nested struct, closed by a stop field
    Struct,
    /// `list<T>`
    List,
}

/// Serialization primitives shared by both protocols
pub trait ThriftWriter {
    /// Opens a struct; field ids restart from 0
    fn struct_begin(&mut self);
    /// Writes the stop field
    fn struct_end(&mut self);
    /// Field header for a value of `kind` that follows
    fn field_begin(&mut self, kind: Kind, id: i16);
    /// A complete boolean field: header and value
    fn bool_field(&mut self, id: i16, value: bool);
    /// Bare `i32` value
    fn i32(&mut self, value: i32);
    /// Bare `i64` value
    fn i64(&mut self, value: i64);
    /// Bare string value
    fn string(&mut self, value: &str);
    /// List header; `size` elements of `element` follow
    fn list_begin(&mut self, element: Kind, size: usize);
}

/// `TBinaryProtocol`: big-endian fixed width integers, typed field headers
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buffer: Vec<u8>,
}

impl BinaryWriter {
    /// The bytes written so far
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    fn kind(kind: Kind) -> u8 {
        match kind {
            Kind::Bool => 2,
            Kind::I32 => 8,
            Kind::I64 => 10,
            Kind::String => 11,
            Kind::Struct => 12,
            Kind::List => 15,
        }
    }
}

impl ThriftWriter for BinaryWriter {
    fn struct_begin(&mut self) {}

    fn struct_end(&mut self) {
        self.buffer.push(0);
    }

    fn field_begin(&mut self, kind: Kind, id: i16) {
        self.buffer.push(Self::kind(kind));
        self.buffer.extend_from_slice(&id.to_be_bytes());
    }

    fn bool_field(&mut self, id: i16, value: bool) {
        self.field_begin(Kind::Bool, id);
        self.buffer.push(u8::from(value));
    }

    fn i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn string(&mut self, value: &str) {
        self.i32(value.len() as i32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    fn list_begin(&mut self, element: Kind, size: usize) {
        self.buffer.push(Self::kind(element));
        self.i32(size as i32);
    }
}

/// `TCompactProtocol`: zigzag varints and delta-encoded field ids
#[derive(Debug, Default)]
pub struct CompactWriter {
    buffer: Vec<u8>,
    last_field: Vec<i16>,
    current_field: i16,
}

const COMPACT_PROTOCOL_ID: u8 = 0x82;
const COMPACT_VERSION: u8 = 1;
const MESSAGE_ONEWAY: u8 = 4;

impl CompactWriter {
    /// The bytes written so far
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Message envelope for a call named `name`
    pub fn message_begin(&mut self, name: &str, message_type: u8, sequence: i32) {
        self.buffer.push(COMPACT_PROTOCOL_ID);
        self.buffer.push((COMPACT_VERSION & 0x1f) | (message_type << 5));
        self.varint(sequence as u32 as u64);
        self.string(name);
    }

    fn kind(kind: Kind) -> u8 {
        match kind {
            Kind::Bool => 1,
            Kind::I32 => 5,
            Kind::I64 => 6,
            Kind::String => 8,
            Kind::List => 9,
            Kind::Struct => 12,
        }
    }

    fn varint(&mut self, mut value: u64) {
        while 0x80 <= value {
            self.buffer.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
    }

    fn field_header(&mut self, kind: u8, id: i16) {
        let delta = id.wrapping_sub(self.current_field);
        if 0 < delta && delta <= 15 {
            self.buffer.push(((delta as u8) << 4) | kind);
        } else {
            self.buffer.push(kind);
            self.varint(zigzag(i64::from(id)));
        }
        self.current_field = id;
    }
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

impl ThriftWriter for CompactWriter {
    fn struct_begin(&mut self) {
        self.last_field.push(self.current_field);
        self.current_field = 0;
    }

    fn struct_end(&mut self) {
        self.buffer.push(0);
        self.current_field = self.last_field.pop().unwrap_or_default();
    }

    fn field_begin(&mut self, kind: Kind, id: i16) {
        self.field_header(Self::kind(kind), id);
    }

    fn bool_field(&mut self, id: i16, value: bool) {
        // the value lives in the type nibble
        self.field_header(if value { 1 } else { 2 }, id);
    }

    fn i32(&mut self, value: i32) {
        self.varint(zigzag(i64::from(value)));
    }

    fn i64(&mut self, value: i64) {
        self.varint(zigzag(value));
    }

    fn string(&mut self, value: &str) {
        self.varint(value.len() as u64);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    fn list_begin(&mut self, element: Kind, size: usize) {
        if size < 15 {
            self.buffer.push(((size as u8) << 4) | Self::kind(element));
        } else {
            self.buffer.push(0xf0 | Self::kind(element));
            self.varint(size as u64);
        }
    }
}

/// A Jaeger tag value. Span attributes are strings; `error` is the one boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// `vType = STRING`
    Str(String),
    /// `vType = BOOL`
    Bool(bool),
}

/// `jaeger.Tag`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag name
    pub key: String,
    /// Tag value and its `vType`
    pub value: TagValue,
}

impl Tag {
    /// A string-valued tag
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Tag {
            key: key.into(),
            value: TagValue::Str(value.into()),
        }
    }

    fn write(&self, w: &mut impl ThriftWriter) {
        w.struct_begin();
        w.field_begin(Kind::String, 1);
        w.string(&self.key);
        w.field_begin(Kind::I32, 2);
        match &self.value {
            TagValue::Str(s) => {
                w.i32(0);
                w.field_begin(Kind::String, 3);
                w.string(s);
            }
            TagValue::Bool(b) => {
                w.i32(2);
                w.bool_field(5, *b);
            }
        }
        w.struct_end();
    }
}

/// `jaeger.Span`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Low 64 bits of the trace id
    pub trace_id_low: i64,
    /// High 64 bits of the trace id
    pub trace_id_high: i64,
    /// Span id
    pub span_id: i64,
    /// Parent span id, 0 for a root span
    pub parent_span_id: i64,
    /// Operation name
    pub operation_name: String,
    /// `1` marks the span sampled
    pub flags: i32,
    /// Microseconds since the unix epoch
    pub start_time: i64,
    /// Microseconds
    pub duration: i64,
    /// Span attributes
    pub tags: Vec<Tag>,
}

impl Span {
    fn write(&self, w: &mut impl ThriftWriter) {
        w.struct_begin();
        w.field_begin(Kind::I64, 1);
        w.i64(self.trace_id_low);
        w.field_begin(Kind::I64, 2);
        w.i64(self.trace_id_high);
        w.field_begin(Kind::I64, 3);
        w.i64(self.span_id);
        w.field_begin(Kind::I64, 4);
        w.i64(self.parent_span_id);
        w.field_begin(Kind::String, 5);
        w.string(&self.operation_name);
        w.field_begin(Kind::I32, 7);
        w.i32(self.flags);
        w.field_begin(Kind::I64, 8);
        w.i64(self.start_time);
        w.field_begin(Kind::I64, 9);
        w.i64(self.duration);
        if !self.tags.is_empty() {
            w.field_begin(Kind::List, 10);
            w.list_begin(Kind::Struct, self.tags.len());
            for tag in &self.tags {
                tag.write(w);
            }
        }
        w.struct_end();
    }
}

/// `jaeger.Process`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    /// Service that emitted the spans
    pub service_name: String,
    /// Process-wide tags
    pub tags: Vec<Tag>,
}

impl Process {
    fn write(&self, w: &mut impl ThriftWriter) {
        w.struct_begin();
        w.field_begin(Kind::String, 1);
        w.string(&self.service_name);
        if !self.tags.is_empty() {
            w.field_begin(Kind::List, 2);
            w.list_begin(Kind::Struct, self.tags.len());
            for tag in &self.tags {
                tag.write(w);
            }
        }
        w.struct_end();
    }
}

/// `jaeger.Batch`: spans of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// The emitting process
    pub process: Process,
    /// Its spans, in order
    pub spans: Vec<Span>,
}

impl Batch {
    fn write(&self, w: &mut impl ThriftWriter) {
        w.struct_begin();
        w.field_begin(Kind::Struct, 1);
        self.process.write(w);
        w.field_begin(Kind::List, 2);
        w.list_begin(Kind::Struct, self.spans.len());
        for span in &self.spans {
            span.write(w);
        }
        w.struct_end();
    }

    /// The batch alone, binary protocol: the collector's `application/x-thrift` body
    pub fn to_binary(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::default();
        self.write(&mut writer);
        writer.into_inner()
    }

    /// A oneway `Agent.emitBatch(batch)` call, compact protocol: one agent datagram
    pub fn to_emit_batch(&self, sequence: i32) -> Vec<u8> {
        let mut writer = CompactWriter::default();
        writer.message_begin("emitBatch", MESSAGE_ONEWAY, sequence);
        writer.struct_begin();
        writer.field_begin(Kind::Struct, 1);
        self.write(&mut writer);
        writer.struct_end();
        writer.into_inner()
    }
}
