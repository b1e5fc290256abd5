//! Proto3 payload schemas.
//!
//! Device profiles carry their protobuf schemas as proto3 source text. This
//! module parses that text into [`MessageDescriptor`]s the proto adaptor can
//! decode and encode against. Only what a payload schema needs is supported:
//! messages (nested), enums, scalar/enum/message fields with `optional` and
//! `repeated`, `oneof` (members are flattened) and `map<K, V>`. `syntax`,
//! `package`, `import`, `option`, `reserved` and `service` are accepted and
//! ignored.

use std::collections::HashMap;
use std::sync::Arc;

use iotedge_core::ProtoPayloadConfiguration;

use crate::error::SchemaError;

/// Schema used when a profile leaves the RPC request schema empty
pub const DEFAULT_RPC_REQUEST_SCHEMA: &str = r#"syntax = "proto3";
package rpc;

message RpcRequestMsg {
  optional string method = 1;
  optional int32 requestId = 2;
  optional string params = 3;
}
"#;

const MAX_FIELD_NUMBER: i64 = (1 << 29) - 1;

/// Protobuf scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int32`
    Int32,
    /// `int64`
    Int64,
    /// `uint32`
    Uint32,
    /// `uint64`
    Uint64,
    /// `sint32`
    Sint32,
    /// `sint64`
    Sint64,
    /// `fixed32`
    Fixed32,
    /// `fixed64`
    Fixed64,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
}

impl ScalarType {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "double" => Self::Double,
            "float" => Self::Float,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "sint32" => Self::Sint32,
            "sint64" => Self::Sint64,
            "fixed32" => Self::Fixed32,
            "fixed64" => Self::Fixed64,
            "sfixed32" => Self::Sfixed32,
            "sfixed64" => Self::Sfixed64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        })
    }

    /// Whether repeated values of this type may be packed
    #[must_use]
    pub const fn is_packable(self) -> bool {
        !matches!(self, Self::String | Self::Bytes)
    }
}

/// Enum type with its declared values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDescriptor {
    /// Enum name
    pub name: String,
    /// Declared `(name, number)` pairs
    pub values: Vec<(String, i32)>,
}

impl EnumDescriptor {
    /// Name of the value numbered `number`
    #[must_use]
    pub fn value_name(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(name, _)| name.as_str())
    }

    /// Number of the value called `name`
    #[must_use]
    pub fn value_number(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Resolved type of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Scalar value
    Scalar(ScalarType),
    /// Enum value
    Enum(Arc<EnumDescriptor>),
    /// Embedded message
    Message(Arc<MessageDescriptor>),
    /// Embedded message of an enclosing type, by fully qualified name
    Recursive(String),
}

/// How many values a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Plain proto3 field
    Singular,
    /// `optional` field with explicit presence
    Optional,
    /// `repeated` field
    Repeated,
    /// `map<K, V>` field, encoded as repeated `{key = 1, value = 2}` entries
    Map,
}

/// One field of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name as declared
    pub name: String,
    /// Field number
    pub number: u32,
    /// Resolved type; for maps, the entry message
    pub field_type: FieldType,
    /// Cardinality
    pub cardinality: Cardinality,
}

impl FieldDescriptor {
    /// Whether the field holds a list of values
    #[must_use]
    pub const fn is_repeated(&self) -> bool {
        matches!(self.cardinality, Cardinality::Repeated | Cardinality::Map)
    }
}

/// Resolved message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    /// Message name
    pub name: String,
    /// Fully qualified name, including the package
    pub full_name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldDescriptor>,
}

impl MessageDescriptor {
    /// Compile `schema` and return the descriptor of its first top-level
    /// message
    pub fn parse(schema: &str) -> Result<Self, SchemaError> {
        let file = Parser::new(schema)?.parse_file()?;
        Resolver::new(&file).resolve_first()
    }

    /// Field numbered `number`
    #[must_use]
    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// Field called `name`
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Descriptor of the RPC request message sent to devices.
///
/// It must declare `method` (string), `requestId` (integer) and `params`
/// (string).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequestTemplate {
    descriptor: MessageDescriptor,
}

impl RpcRequestTemplate {
    /// Compile `schema`, or the default request schema when it is blank
    pub fn parse(schema: &str) -> Result<Self, SchemaError> {
        let source = if schema.trim().is_empty() {
            DEFAULT_RPC_REQUEST_SCHEMA
        } else {
            schema
        };
        let descriptor = MessageDescriptor::parse(source)?;
        Self::require(&descriptor, "method", &[ScalarType::String])?;
        Self::require(
            &descriptor,
            "requestId",
            &[
                ScalarType::Int32,
                ScalarType::Int64,
                ScalarType::Uint32,
                ScalarType::Uint64,
                ScalarType::Sint32,
                ScalarType::Sint64,
            ],
        )?;
        Self::require(&descriptor, "params", &[ScalarType::String])?;
        Ok(Self { descriptor })
    }

    /// Underlying message descriptor
    #[must_use]
    pub const fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    fn require(
        descriptor: &MessageDescriptor,
        name: &str,
        allowed: &[ScalarType],
    ) -> Result<(), SchemaError> {
        match descriptor.field_by_name(name) {
            Some(FieldDescriptor {
                field_type: FieldType::Scalar(scalar),
                cardinality: Cardinality::Singular | Cardinality::Optional,
                ..
            }) if allowed.contains(scalar) => Ok(()),
            _ => Err(SchemaError::Unsupported(format!(
                "RPC request message '{}' needs a scalar field '{name}'",
                descriptor.name
            ))),
        }
    }
}

/// All descriptors of a protobuf session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSchemas {
    /// Telemetry uploads
    pub telemetry: Arc<MessageDescriptor>,
    /// Attribute updates
    pub attributes: Arc<MessageDescriptor>,
    /// RPC responses from the device
    pub rpc_response: Arc<MessageDescriptor>,
    /// RPC requests to the device
    pub rpc_request: Arc<RpcRequestTemplate>,
}

impl SessionSchemas {
    /// Compile every schema of `config`
    pub fn compile(config: &ProtoPayloadConfiguration) -> Result<Self, SchemaError> {
        Ok(Self {
            telemetry: Arc::new(MessageDescriptor::parse(&config.device_telemetry_proto_schema)?),
            attributes: Arc::new(MessageDescriptor::parse(
                &config.device_attributes_proto_schema,
            )?),
            rpc_response: Arc::new(MessageDescriptor::parse(
                &config.device_rpc_response_proto_schema,
            )?),
            rpc_request: Arc::new(RpcRequestTemplate::parse(
                &config.device_rpc_request_proto_schema,
            )?),
        })
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Symbol(char),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(s) | Self::Str(s) => s.clone(),
            Self::Int(n) => n.to_string(),
            Self::Symbol(c) => c.to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, SchemaError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                match chars.next() {
                    Some('/') => {
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                                break;
                            }
                        }
                    }
                    Some('*') => {
                        let mut prev = '\0';
                        let mut closed = false;
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                            }
                            if prev == '*' && c == '/' {
                                closed = true;
                                break;
                            }
                            prev = c;
                        }
                        if !closed {
                            return Err(SchemaError::UnexpectedEof {
                                expected: "end of comment",
                            });
                        }
                    }
                    other => {
                        return Err(SchemaError::UnexpectedToken {
                            found: format!("/{}", other.map(String::from).unwrap_or_default()),
                            expected: "comment",
                            line,
                        });
                    }
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some('\\') => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        Some(c) => value.push(c),
                        None => {
                            return Err(SchemaError::UnexpectedEof {
                                expected: "closing quote",
                            });
                        }
                    }
                }
                tokens.push((Token::Str(value), line));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((parse_int(&text, line)?, line));
            }
            c if c.is_alphabetic() || c == '_' || c == '.' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '.' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((Token::Ident(ident), line));
            }
            '{' | '}' | ';' | '=' | '<' | '>' | ',' | '[' | ']' | '(' | ')' => {
                tokens.push((Token::Symbol(c), line));
                chars.next();
            }
            other => {
                return Err(SchemaError::UnexpectedToken {
                    found: other.to_string(),
                    expected: "a proto3 token",
                    line,
                });
            }
        }
    }
    Ok(tokens)
}

fn parse_int(text: &str, line: usize) -> Result<Token, SchemaError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        digits.parse::<i64>().ok()
    };
    match parsed {
        Some(n) => Ok(Token::Int(if negative { -n } else { n })),
        // Float literals only appear in option values, which are skipped.
        None if digits.parse::<f64>().is_ok() => Ok(Token::Ident(text.to_string())),
        None => Err(SchemaError::UnexpectedToken {
            found: text.to_string(),
            expected: "a number",
            line,
        }),
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RawFile {
    package: Option<String>,
    messages: Vec<RawMessage>,
    enums: Vec<Arc<EnumDescriptor>>,
}

#[derive(Debug, Default)]
struct RawMessage {
    name: String,
    fields: Vec<RawField>,
    messages: Vec<RawMessage>,
    enums: Vec<Arc<EnumDescriptor>>,
}

#[derive(Debug)]
struct RawField {
    name: String,
    number: u32,
    type_name: String,
    cardinality: Cardinality,
    map_key: Option<String>,
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, SchemaError> {
        if source.trim().is_empty() {
            return Err(SchemaError::Empty);
        }
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self, expected: &'static str) -> Result<(Token, usize), SchemaError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(SchemaError::UnexpectedEof { expected })?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(token: &Token, line: usize, expected: &'static str) -> SchemaError {
        SchemaError::UnexpectedToken {
            found: token.describe(),
            expected,
            line,
        }
    }

    fn expect_symbol(&mut self, symbol: char, expected: &'static str) -> Result<(), SchemaError> {
        match self.next(expected)? {
            (Token::Symbol(c), _) if c == symbol => Ok(()),
            (token, line) => Err(Self::unexpected(&token, line, expected)),
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<String, SchemaError> {
        match self.next(expected)? {
            (Token::Ident(name), _) => Ok(name),
            (token, line) => Err(Self::unexpected(&token, line, expected)),
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.peek() == Some(&Token::Symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skip to the end of the current statement
    fn skip_statement(&mut self) -> Result<(), SchemaError> {
        loop {
            if let (Token::Symbol(';'), _) = self.next("';'")? {
                return Ok(());
            }
        }
    }

    /// Skip a `{ ... }` block, nested blocks included
    fn skip_block(&mut self) -> Result<(), SchemaError> {
        loop {
            match self.next("'{'")? {
                (Token::Symbol('{'), _) => break,
                (Token::Symbol(';'), _) => return Ok(()),
                _ => {}
            }
        }
        let mut depth = 1;
        while depth > 0 {
            match self.next("'}'")? {
                (Token::Symbol('{'), _) => depth += 1,
                (Token::Symbol('}'), _) => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_file(mut self) -> Result<RawFile, SchemaError> {
        let mut file = RawFile::default();
        while let Some(token) = self.peek().cloned() {
            match token {
                Token::Ident(kw) if kw == "syntax" || kw == "import" || kw == "option" => {
                    self.skip_statement()?;
                }
                Token::Ident(kw) if kw == "package" => {
                    self.pos += 1;
                    file.package = Some(self.ident("package name")?);
                    self.expect_symbol(';', "';'")?;
                }
                Token::Ident(kw) if kw == "message" => {
                    self.pos += 1;
                    file.messages.push(self.parse_message()?);
                }
                Token::Ident(kw) if kw == "enum" => {
                    self.pos += 1;
                    file.enums.push(Arc::new(self.parse_enum()?));
                }
                Token::Ident(kw) if kw == "service" || kw == "extend" => {
                    self.skip_block()?;
                }
                Token::Symbol(';') => self.pos += 1,
                other => {
                    let line = self.tokens[self.pos].1;
                    return Err(Self::unexpected(&other, line, "a top-level declaration"));
                }
            }
        }
        Ok(file)
    }

    fn parse_message(&mut self) -> Result<RawMessage, SchemaError> {
        let mut message = RawMessage {
            name: self.ident("message name")?,
            ..RawMessage::default()
        };
        self.expect_symbol('{', "'{'")?;
        loop {
            let Some(token) = self.peek().cloned() else {
                return Err(SchemaError::UnexpectedEof { expected: "'}'" });
            };
            match token {
                Token::Symbol('}') => {
                    self.pos += 1;
                    return Ok(message);
                }
                Token::Symbol(';') => self.pos += 1,
                Token::Ident(kw) => match kw.as_str() {
                    "message" => {
                        self.pos += 1;
                        message.messages.push(self.parse_message()?);
                    }
                    "enum" => {
                        self.pos += 1;
                        message.enums.push(Arc::new(self.parse_enum()?));
                    }
                    "option" | "reserved" => self.skip_statement()?,
                    "extensions" | "extend" | "group" => {
                        return Err(SchemaError::Unsupported(kw.clone()));
                    }
                    "oneof" => {
                        self.pos += 1;
                        self.ident("oneof name")?;
                        self.expect_symbol('{', "'{'")?;
                        while !self.eat_symbol('}') {
                            if self.peek() == Some(&Token::Ident("option".into())) {
                                self.skip_statement()?;
                                continue;
                            }
                            message.fields.push(self.parse_field(Cardinality::Optional)?);
                        }
                    }
                    "map" => message.fields.push(self.parse_map_field()?),
                    "optional" => {
                        self.pos += 1;
                        message.fields.push(self.parse_field(Cardinality::Optional)?);
                    }
                    "repeated" => {
                        self.pos += 1;
                        message.fields.push(self.parse_field(Cardinality::Repeated)?);
                    }
                    "required" => {
                        return Err(SchemaError::Unsupported("required fields".into()));
                    }
                    _ => message.fields.push(self.parse_field(Cardinality::Singular)?),
                },
                other => {
                    let line = self.tokens[self.pos].1;
                    return Err(Self::unexpected(&other, line, "a field or declaration"));
                }
            }
        }
    }

    fn parse_field(&mut self, cardinality: Cardinality) -> Result<RawField, SchemaError> {
        let type_name = self.ident("field type")?;
        self.finish_field(type_name, cardinality, None)
    }

    fn parse_map_field(&mut self) -> Result<RawField, SchemaError> {
        self.ident("'map'")?;
        self.expect_symbol('<', "'<'")?;
        let key = self.ident("map key type")?;
        self.expect_symbol(',', "','")?;
        let value = self.ident("map value type")?;
        self.expect_symbol('>', "'>'")?;
        self.finish_field(value, Cardinality::Map, Some(key))
    }

    fn finish_field(
        &mut self,
        type_name: String,
        cardinality: Cardinality,
        map_key: Option<String>,
    ) -> Result<RawField, SchemaError> {
        let name = self.ident("field name")?;
        self.expect_symbol('=', "'='")?;
        let number = match self.next("field number")? {
            (Token::Int(n), _) if (1..=MAX_FIELD_NUMBER).contains(&n) => n as u32,
            (Token::Int(n), _) => {
                return Err(SchemaError::InvalidFieldNumber {
                    field: name,
                    number: n,
                });
            }
            (token, line) => return Err(Self::unexpected(&token, line, "field number")),
        };
        if self.eat_symbol('[') {
            while !self.eat_symbol(']') {
                self.next("']'")?;
            }
        }
        self.expect_symbol(';', "';'")?;
        Ok(RawField {
            name,
            number,
            type_name,
            cardinality,
            map_key,
        })
    }

    fn parse_enum(&mut self) -> Result<EnumDescriptor, SchemaError> {
        let name = self.ident("enum name")?;
        self.expect_symbol('{', "'{'")?;
        let mut values = Vec::new();
        loop {
            match self.next("'}'")? {
                (Token::Symbol('}'), _) => break,
                (Token::Symbol(';'), _) => {}
                (Token::Ident(kw), _) if kw == "option" || kw == "reserved" => {
                    self.skip_statement()?;
                }
                (Token::Ident(value), _) => {
                    self.expect_symbol('=', "'='")?;
                    let number = match self.next("enum value number")? {
                        (Token::Int(n), _) => i32::try_from(n).map_err(|_| {
                            SchemaError::InvalidFieldNumber {
                                field: value.clone(),
                                number: n,
                            }
                        })?,
                        (token, line) => {
                            return Err(Self::unexpected(&token, line, "enum value number"));
                        }
                    };
                    if self.eat_symbol('[') {
                        while !self.eat_symbol(']') {
                            self.next("']'")?;
                        }
                    }
                    self.expect_symbol(';', "';'")?;
                    values.push((value, number));
                }
                (token, line) => return Err(Self::unexpected(&token, line, "enum value")),
            }
        }
        Ok(EnumDescriptor { name, values })
    }
}

// ---------------------------------------------------------------------------
// Name resolution
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Declared<'a> {
    Message(&'a RawMessage),
    Enum(&'a Arc<EnumDescriptor>),
}

struct Resolver<'a> {
    file: &'a RawFile,
    /// Every declaration by fully qualified name (without leading dot)
    index: HashMap<String, Declared<'a>>,
    resolving: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn new(file: &'a RawFile) -> Self {
        let mut index = HashMap::new();
        let prefix = file.package.clone().unwrap_or_default();
        for message in &file.messages {
            Self::index_message(&mut index, &prefix, message);
        }
        for enumeration in &file.enums {
            index.insert(qualify(&prefix, &enumeration.name), Declared::Enum(enumeration));
        }
        Self {
            file,
            index,
            resolving: Vec::new(),
        }
    }

    fn index_message(
        index: &mut HashMap<String, Declared<'a>>,
        scope: &str,
        message: &'a RawMessage,
    ) {
        let full_name = qualify(scope, &message.name);
        for nested in &message.messages {
            Self::index_message(index, &full_name, nested);
        }
        for enumeration in &message.enums {
            index.insert(qualify(&full_name, &enumeration.name), Declared::Enum(enumeration));
        }
        index.insert(full_name, Declared::Message(message));
    }

    fn resolve_first(mut self) -> Result<MessageDescriptor, SchemaError> {
        let file = self.file;
        let first = file.messages.first().ok_or(SchemaError::NoMessage)?;
        let scope = file.package.clone().unwrap_or_default();
        self.resolve_message(&scope, first)
    }

    fn resolve_message(
        &mut self,
        scope: &str,
        message: &RawMessage,
    ) -> Result<MessageDescriptor, SchemaError> {
        let full_name = qualify(scope, &message.name);
        self.resolving.push(full_name.clone());

        let mut fields = Vec::with_capacity(message.fields.len());
        for raw in &message.fields {
            let value_type = self.resolve_type(&full_name, &raw.type_name)?;
            let field_type = match &raw.map_key {
                Some(key) => {
                    let key_type = ScalarType::from_name(key)
                        .filter(|k| {
                            !matches!(k, ScalarType::Double | ScalarType::Float | ScalarType::Bytes)
                        })
                        .ok_or_else(|| SchemaError::Unsupported(format!("map key type '{key}'")))?;
                    FieldType::Message(Arc::new(MessageDescriptor {
                        name: format!("{}Entry", raw.name),
                        full_name: format!("{full_name}.{}Entry", raw.name),
                        fields: vec![
                            FieldDescriptor {
                                name: "key".into(),
                                number: 1,
                                field_type: FieldType::Scalar(key_type),
                                cardinality: Cardinality::Singular,
                            },
                            FieldDescriptor {
                                name: "value".into(),
                                number: 2,
                                field_type: value_type,
                                cardinality: Cardinality::Singular,
                            },
                        ],
                    }))
                }
                None => value_type,
            };
            fields.push(FieldDescriptor {
                name: raw.name.clone(),
                number: raw.number,
                field_type,
                cardinality: raw.cardinality,
            });
        }

        self.resolving.pop();
        Ok(MessageDescriptor {
            name: message.name.clone(),
            full_name,
            fields,
        })
    }

    fn resolve_type(&mut self, scope: &str, type_name: &str) -> Result<FieldType, SchemaError> {
        if let Some(scalar) = ScalarType::from_name(type_name) {
            return Ok(FieldType::Scalar(scalar));
        }

        let (found_name, declared) = self.lookup(scope, type_name).ok_or_else(|| {
            SchemaError::Unsupported(format!("unknown type '{type_name}' in '{scope}'"))
        })?;
        match declared {
            Declared::Enum(enumeration) => Ok(FieldType::Enum(Arc::clone(enumeration))),
            Declared::Message(_) if self.resolving.contains(&found_name) => {
                Ok(FieldType::Recursive(found_name))
            }
            Declared::Message(message) => {
                let parent = found_name
                    .rsplit_once('.')
                    .map(|(parent, _)| parent.to_string())
                    .unwrap_or_default();
                Ok(FieldType::Message(Arc::new(
                    self.resolve_message(&parent, message)?,
                )))
            }
        }
    }

    /// Protobuf scoping: innermost scope outwards, or absolute with a
    /// leading dot
    fn lookup(&self, scope: &str, type_name: &str) -> Option<(String, Declared<'a>)> {
        if let Some(absolute) = type_name.strip_prefix('.') {
            return self
                .index
                .get(absolute)
                .map(|declared| (absolute.to_string(), *declared));
        }
        let mut current = scope.to_string();
        loop {
            let candidate = qualify(&current, type_name);
            if let Some(declared) = self.index.get(&candidate) {
                return Some((candidate, *declared));
            }
            if current.is_empty() {
                return None;
            }
            current = current
                .rsplit_once('.')
                .map(|(parent, _)| parent.to_string())
                .unwrap_or_default();
        }
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}
