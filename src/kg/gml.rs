//! Reading and writing the subset of GML produced by networkx.
//!
//! ```text
//! graph [
//!   directed 0
//!   node [
//!     id 0
//!     label "BRCA1"
//!     type "gene/protein"
//!   ]
//!   edge [
//!     source 0
//!     target 1
//!   ]
//! ]
//! ```
//!
//! The node key is the `label` attribute. Strings may contain HTML character references
//! (`&amp;`, `&#955;`, ...), which are decoded on read and produced on write.
use logos::Logos;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Write as _, io};

use crate::{
    kg::{KnowledgeGraph, Node},
    ArcStr,
};

/// A GML attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(ArcStr),
    /// A nested `[ ... ]` block. Keys may repeat.
    List(Vec<(ArcStr, Value)>),
}

impl Value {
    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&ArcStr> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Logos, Copy, Clone, Debug, PartialEq)]
enum Tok<'input> {
    #[token("[")]
    Open,
    #[token("]")]
    Close,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice())]
    Key(&'input str),
    #[regex(r"[+-]?[0-9]+", |lex| lex.slice().parse())]
    Int(i64),
    #[regex(r"[+-]?([0-9]+\.[0-9]*|\.[0-9]+)([eE][+-]?[0-9]+)?", |lex| lex.slice().parse())]
    #[regex(r"[+-]?[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse())]
    #[regex(r"[+-]INF", |lex| if lex.slice().starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY })]
    Real(f64),
    #[regex(r#""[^"]*""#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    Str(&'input str),
    #[error]
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    #[regex(r"#[^\n]*", logos::skip)]
    Error,
}

struct Parser<'input> {
    input: &'input str,
    lex: logos::Lexer<'input, Tok<'input>>,
}

impl<'input> Parser<'input> {
    fn new(input: &'input str) -> Self {
        Self {
            input,
            lex: Tok::lexer(input),
        }
    }

    /// Line number of the most recent token, for error messages.
    fn line(&self) -> usize {
        let pos = self.lex.span().start.min(self.input.len());
        self.input[..pos].matches('\n').count() + 1
    }

    fn next(&mut self) -> Result<Option<Tok<'input>>> {
        match self.lex.next() {
            Some(Tok::Error) => bail!(
                "unexpected input \"{}\" on line {}",
                self.lex.slice(),
                self.line()
            ),
            tok => Ok(tok),
        }
    }

    /// Parse `key value` pairs until the end of input (top level) or a closing bracket (nested).
    fn list(&mut self, nested: bool) -> Result<Vec<(ArcStr, Value)>> {
        let mut out = vec![];
        loop {
            match self.next()? {
                None if nested => bail!("unclosed `[` at end of input"),
                None => return Ok(out),
                Some(Tok::Close) if nested => return Ok(out),
                Some(Tok::Key(key)) => {
                    let value = self.value()?;
                    out.push((key.into(), value));
                }
                Some(tok) => bail!("expected a key, found {:?} on line {}", tok, self.line()),
            }
        }
    }

    fn value(&mut self) -> Result<Value> {
        Ok(match self.next()? {
            Some(Tok::Int(v)) => Value::Int(v),
            Some(Tok::Real(v)) => Value::Real(v),
            Some(Tok::Key("INF")) => Value::Real(f64::INFINITY),
            Some(Tok::Key("NAN")) => Value::Real(f64::NAN),
            Some(Tok::Str(s)) => Value::Str(unescape(s).into()),
            Some(Tok::Open) => Value::List(self.list(true)?),
            Some(tok) => bail!("expected a value, found {:?} on line {}", tok, self.line()),
            None => bail!("expected a value, found end of input"),
        })
    }
}

/// Parse GML text into a graph.
pub fn parse(input: &str) -> Result<KnowledgeGraph> {
    let top = Parser::new(input).list(false)?;
    let graph = top
        .into_iter()
        .find_map(|(key, value)| match value {
            Value::List(items) if &*key == "graph" => Some(items),
            _ => None,
        })
        .context("no `graph [ ... ]` block")?;

    let flag = |name: &str| {
        graph
            .iter()
            .any(|(key, value)| &**key == name && value.as_int() == Some(1))
    };
    let mut kg = KnowledgeGraph::new(flag("directed"));
    kg.set_multigraph(flag("multigraph"));
    let mut gml_ids = BTreeMap::new();
    let mut edges = vec![];

    for (key, value) in graph {
        match (&*key, value) {
            ("node", Value::List(attrs)) => {
                let (gml_id, node) = node_from_attrs(attrs)?;
                let key = node.key.clone();
                let idx = kg.add_node(node)?;
                ensure!(
                    gml_ids.insert(gml_id, idx).is_none(),
                    "node \"{}\" reuses id {}",
                    key,
                    gml_id
                );
            }
            ("edge", Value::List(attrs)) => edges.push(edge_from_attrs(&attrs)?),
            ("node", _) | ("edge", _) => bail!("`{}` must be followed by `[`", key),
            _ => (),
        }
    }

    // edges may come before the nodes they reference.
    for (source, target) in edges {
        let from = *gml_ids
            .get(&source)
            .with_context(|| format!("edge source {} is not a node id", source))?;
        let to = *gml_ids
            .get(&target)
            .with_context(|| format!("edge target {} is not a node id", target))?;
        kg.add_edge(from, to)?;
    }
    Ok(kg)
}

fn node_from_attrs(attrs: Vec<(ArcStr, Value)>) -> Result<(i64, Node)> {
    let mut id = None;
    let mut label = None;
    let mut node_type = None;
    let mut rest = BTreeMap::new();
    for (key, value) in attrs {
        match &*key {
            "id" => id = Some(value.as_int().context("node id must be an integer")?),
            "label" => label = Some(value),
            "type" => node_type = value.as_str().cloned(),
            _ => {
                rest.insert(key, value);
            }
        }
    }
    let id = id.context("node without an `id`")?;
    let key: ArcStr = match label {
        Some(Value::Str(s)) => s,
        Some(Value::Int(v)) => v.to_string().into(),
        Some(Value::Real(v)) => v.to_string().into(),
        Some(Value::List(_)) => bail!("node {} has a list as its label", id),
        None => bail!("node {} has no `label`", id),
    };
    Ok((
        id,
        Node {
            key,
            node_type,
            attrs: rest,
        },
    ))
}

fn edge_from_attrs(attrs: &[(ArcStr, Value)]) -> Result<(i64, i64)> {
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(key, _)| &**key == name)
            .and_then(|(_, value)| value.as_int())
            .with_context(|| format!("edge without an integer `{}`", name))
    };
    Ok((get("source")?, get("target")?))
}

/// Decode the HTML character references networkx writes into strings.
fn unescape(input: &str) -> String {
    html_escape::decode_html_entities(input).into_owned()
}

/// Strings are written as ASCII, with anything else as a numeric character reference.
fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in html_escape::encode_double_quoted_attribute(input).chars() {
        if ch.is_ascii() && !ch.is_ascii_control() {
            out.push(ch);
        } else {
            let _ = write!(out, "&#{};", ch as u32);
        }
    }
    out
}

fn write_value(out: &mut impl io::Write, value: &Value, indent: usize) -> io::Result<()> {
    match value {
        Value::Int(v) => writeln!(out, "{}", v),
        Value::Real(v) if v.is_nan() => writeln!(out, "NAN"),
        Value::Real(v) if v.is_infinite() => {
            writeln!(out, "{}INF", if *v < 0. { "-" } else { "+" })
        }
        // `{:?}` always includes a decimal point, so the value reads back as a real.
        Value::Real(v) => writeln!(out, "{:?}", v),
        Value::Str(s) => writeln!(out, "\"{}\"", escape(s)),
        Value::List(items) => {
            writeln!(out, "[")?;
            for (key, value) in items {
                write!(out, "{:width$}{} ", "", key, width = indent + 2)?;
                write_value(out, value, indent + 2)?;
            }
            writeln!(out, "{:width$}]", "", width = indent)
        }
    }
}

/// Write a graph as GML, numbering nodes by their id.
pub fn write(kg: &KnowledgeGraph, out: &mut impl io::Write) -> io::Result<()> {
    writeln!(out, "graph [")?;
    if kg.is_directed() {
        writeln!(out, "  directed 1")?;
    }
    if kg.is_multigraph() {
        writeln!(out, "  multigraph 1")?;
    }
    for (idx, node) in kg.iter().enumerate() {
        writeln!(out, "  node [")?;
        writeln!(out, "    id {}", idx)?;
        writeln!(out, "    label \"{}\"", escape(&node.key))?;
        if let Some(ty) = &node.node_type {
            writeln!(out, "    type \"{}\"", escape(ty))?;
        }
        for (key, value) in &node.attrs {
            write!(out, "    {} ", key)?;
            write_value(out, value, 4)?;
        }
        writeln!(out, "  ]")?;
    }
    for (from, to) in kg.edges() {
        writeln!(out, "  edge [")?;
        writeln!(out, "    source {}", from)?;
        writeln!(out, "    target {}", to)?;
        writeln!(out, "  ]")?;
    }
    writeln!(out, "]")
}
