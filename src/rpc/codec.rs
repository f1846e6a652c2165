// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! XML encoding of method calls and decoding of method responses.
//!
//! Decoding flattens the document into owned tokens first and then runs a
//! small recursive descent over them, which keeps the grammar readable.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::value::Value;
use super::RpcError;

/// Encode a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?><methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        encode_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => {
            let _ = write!(out, "<int>{}</int>", i);
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</string>");
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{}</double>", d);
        }
        Value::DateTime(s) => {
            out.push_str("<dateTime.iso8601>");
            out.push_str(&escape(s.as_str()));
            out.push_str("</dateTime.iso8601>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                encode_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name.as_str()));
                out.push_str("</name>");
                encode_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Start(String),
    End(String),
    Empty(String),
    Text(String),
}

fn tokenize(xml: &str) -> Result<Vec<Token>, RpcError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut tokens = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| RpcError::Parse(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => {
                tokens.push(Token::Start(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::End(e) => {
                tokens.push(Token::End(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::Empty(e) => {
                tokens.push(Token::Empty(String::from_utf8_lossy(e.name().as_ref()).into_owned()));
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| RpcError::Parse(e.to_string()))?;
                tokens.push(Token::Text(text.into_owned()));
            }
            Event::CData(c) => {
                tokens.push(Token::Text(String::from_utf8_lossy(&c.into_inner()).into_owned()));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, RpcError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| RpcError::Parse("unexpected end of document".into()))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect_start(&mut self, tag: &str) -> Result<(), RpcError> {
        match self.next()? {
            Token::Start(name) if name == tag => Ok(()),
            other => Err(RpcError::Parse(format!("expected <{}>, found {:?}", tag, other))),
        }
    }

    fn expect_end(&mut self, tag: &str) -> Result<(), RpcError> {
        match self.next()? {
            Token::End(name) if name == tag => Ok(()),
            other => Err(RpcError::Parse(format!("expected </{}>, found {:?}", tag, other))),
        }
    }

    /// Text content up to the closing `tag`, empty when the element is empty.
    fn text_until_end(&mut self, tag: &str) -> Result<String, RpcError> {
        match self.next()? {
            Token::Text(text) => {
                self.expect_end(tag)?;
                Ok(text)
            }
            Token::End(name) if name == tag => Ok(String::new()),
            other => Err(RpcError::Parse(format!("expected text in <{}>, found {:?}", tag, other))),
        }
    }

    fn parse_value(&mut self) -> Result<Value, RpcError> {
        match self.next()? {
            Token::Empty(name) if name == "value" => return Ok(Value::String(String::new())),
            Token::Start(name) if name == "value" => {}
            other => return Err(RpcError::Parse(format!("expected <value>, found {:?}", other))),
        }

        let value = match self.next()? {
            // untyped values are strings
            Token::Text(text) => {
                self.expect_end("value")?;
                return Ok(Value::String(text));
            }
            Token::End(name) if name == "value" => return Ok(Value::String(String::new())),
            Token::Empty(tag) => match tag.as_str() {
                "string" => Value::String(String::new()),
                "nil" => Value::Nil,
                "array" => Value::Array(Vec::new()),
                "struct" => Value::Struct(BTreeMap::new()),
                other => return Err(RpcError::Parse(format!("empty <{}/> is not a value", other))),
            },
            Token::Start(tag) => self.parse_typed(&tag)?,
            other => return Err(RpcError::Parse(format!("unexpected {:?} in <value>", other))),
        };

        self.expect_end("value")?;
        Ok(value)
    }

    fn parse_typed(&mut self, tag: &str) -> Result<Value, RpcError> {
        match tag {
            "string" => Ok(Value::String(self.text_until_end(tag)?)),
            "int" | "i4" | "i8" => {
                let text = self.text_until_end(tag)?;
                text.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| RpcError::Parse(format!("invalid integer '{}'", text)))
            }
            "boolean" => match self.text_until_end(tag)?.trim() {
                "1" | "true" => Ok(Value::Bool(true)),
                "0" | "false" => Ok(Value::Bool(false)),
                other => Err(RpcError::Parse(format!("invalid boolean '{}'", other))),
            },
            "double" => {
                let text = self.text_until_end(tag)?;
                text.trim()
                    .parse()
                    .map(Value::Double)
                    .map_err(|_| RpcError::Parse(format!("invalid double '{}'", text)))
            }
            "dateTime.iso8601" => Ok(Value::DateTime(self.text_until_end(tag)?)),
            "nil" => {
                self.expect_end(tag)?;
                Ok(Value::Nil)
            }
            "array" => self.parse_array(),
            "struct" => self.parse_struct(),
            other => Err(RpcError::Parse(format!("unsupported value type <{}>", other))),
        }
    }

    fn parse_array(&mut self) -> Result<Value, RpcError> {
        let mut items = Vec::new();
        match self.next()? {
            Token::Empty(name) if name == "data" => {}
            Token::Start(name) if name == "data" => {
                while !matches!(self.peek(), Some(Token::End(name)) if name == "data") {
                    items.push(self.parse_value()?);
                }
                self.expect_end("data")?;
            }
            other => return Err(RpcError::Parse(format!("expected <data>, found {:?}", other))),
        }
        self.expect_end("array")?;
        Ok(Value::Array(items))
    }

    fn parse_struct(&mut self) -> Result<Value, RpcError> {
        let mut members = BTreeMap::new();
        loop {
            match self.next()? {
                Token::End(name) if name == "struct" => break,
                Token::Start(name) if name == "member" => {
                    self.expect_start("name")?;
                    let key = self.text_until_end("name")?;
                    let value = self.parse_value()?;
                    self.expect_end("member")?;
                    members.insert(key, value);
                }
                other => return Err(RpcError::Parse(format!("expected <member>, found {:?}", other))),
            }
        }
        Ok(Value::Struct(members))
    }
}

/// Decode a `methodResponse` document into its single return value.
///
/// A `<fault>` response becomes [`RpcError::Fault`].
pub fn decode_response(xml: &str) -> Result<Value, RpcError> {
    let mut parser = Parser { tokens: tokenize(xml)?, pos: 0 };
    parser.expect_start("methodResponse")?;

    match parser.next()? {
        Token::Start(name) if name == "params" => {
            parser.expect_start("param")?;
            let value = parser.parse_value()?;
            parser.expect_end("param")?;
            parser.expect_end("params")?;
            Ok(value)
        }
        Token::Start(name) if name == "fault" => {
            let fault = parser.parse_value()?;
            Err(fault_from_value(&fault))
        }
        other => Err(RpcError::Parse(format!("expected <params> or <fault>, found {:?}", other))),
    }
}

/// Interpret a `{faultCode, faultString}` struct.
pub fn fault_from_value(value: &Value) -> RpcError {
    let members = value.as_struct();
    let code = members
        .and_then(|m| m.get("faultCode"))
        .and_then(Value::as_i64)
        .unwrap_or(-1);
    let message = members
        .and_then(|m| m.get("faultString"))
        .and_then(Value::as_str)
        .unwrap_or("unknown fault")
        .to_string();
    RpcError::Fault { code, message }
}
