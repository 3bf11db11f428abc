use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::Pep508Error;
use crate::cursor::Cursor;

/// An environment marker variable.
///
/// The dotted PEP 345 spellings (`os.name`, `sys.platform`, ...) parse to the same variants and
/// print with their modern names.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum MarkerVariable {
    ImplementationName,
    ImplementationVersion,
    OsName,
    PlatformMachine,
    PlatformPythonImplementation,
    PlatformRelease,
    PlatformSystem,
    PlatformVersion,
    PythonFullVersion,
    PythonVersion,
    SysPlatform,
    Extra,
}

impl MarkerVariable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImplementationName => "implementation_name",
            Self::ImplementationVersion => "implementation_version",
            Self::OsName => "os_name",
            Self::PlatformMachine => "platform_machine",
            Self::PlatformPythonImplementation => "platform_python_implementation",
            Self::PlatformRelease => "platform_release",
            Self::PlatformSystem => "platform_system",
            Self::PlatformVersion => "platform_version",
            Self::PythonFullVersion => "python_full_version",
            Self::PythonVersion => "python_version",
            Self::SysPlatform => "sys_platform",
            Self::Extra => "extra",
        }
    }
}

impl FromStr for MarkerVariable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let variable = match s {
            "implementation_name" => Self::ImplementationName,
            "implementation_version" => Self::ImplementationVersion,
            "os_name" | "os.name" => Self::OsName,
            "platform_machine" | "platform.machine" => Self::PlatformMachine,
            "platform_python_implementation" | "platform.python_implementation" => {
                Self::PlatformPythonImplementation
            }
            "platform_release" => Self::PlatformRelease,
            "platform_system" => Self::PlatformSystem,
            "platform_version" | "platform.version" => Self::PlatformVersion,
            "python_full_version" => Self::PythonFullVersion,
            "python_version" => Self::PythonVersion,
            "sys_platform" | "sys.platform" => Self::SysPlatform,
            "extra" => Self::Extra,
            _ => return Err(format!("Invalid key: {s}")),
        };
        Ok(variable)
    }
}

impl Display for MarkerVariable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either side of a marker comparison.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MarkerValue {
    Variable(MarkerVariable),
    QuotedString(String),
}

impl MarkerValue {
    pub fn as_variable(&self) -> Option<MarkerVariable> {
        match self {
            Self::Variable(variable) => Some(*variable),
            Self::QuotedString(_) => None,
        }
    }

    pub fn as_quoted(&self) -> Option<&str> {
        match self {
            Self::Variable(_) => None,
            Self::QuotedString(value) => Some(value),
        }
    }
}

impl Display for MarkerValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variable(variable) => variable.fmt(f),
            Self::QuotedString(value) if value.contains('"') => write!(f, "'{value}'"),
            Self::QuotedString(value) => write!(f, "\"{value}\""),
        }
    }
}

/// How to compare key and value, such as by `==`, `>` or `not in`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MarkerOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    TildeEqual,
    ExactEqual,
    In,
    NotIn,
}

impl MarkerOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterEqual => ">=",
            Self::LessThan => "<",
            Self::LessEqual => "<=",
            Self::TildeEqual => "~=",
            Self::ExactEqual => "===",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

impl FromStr for MarkerOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let operator = match s {
            "==" => Self::Equal,
            "!=" => Self::NotEqual,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessEqual,
            "~=" => Self::TildeEqual,
            "===" => Self::ExactEqual,
            "in" => Self::In,
            other => return Err(format!("Invalid comparator: {other}")),
        };
        Ok(operator)
    }
}

impl Display for MarkerOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `<value> <op> <value>` clause, e.g. `python_version >= "3.8"`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MarkerExpression {
    pub l_value: MarkerValue,
    pub operator: MarkerOperator,
    pub r_value: MarkerValue,
}

impl MarkerExpression {
    /// Whether either side of the clause is the `extra` variable.
    pub fn mentions_extra(&self) -> bool {
        self.l_value == MarkerValue::Variable(MarkerVariable::Extra)
            || self.r_value == MarkerValue::Variable(MarkerVariable::Extra)
    }
}

impl Display for MarkerExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.l_value, self.operator, self.r_value)
    }
}

/// A marker expression tree. `And` and `Or` are n-ary and never hold fewer than two children
/// when produced by the parser.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MarkerTree {
    Expression(MarkerExpression),
    And(Vec<MarkerTree>),
    Or(Vec<MarkerTree>),
}

impl MarkerTree {
    /// The clauses of the tree in source order, depth first.
    pub fn expressions(&self) -> Vec<&MarkerExpression> {
        let mut expressions = Vec::new();
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            match tree {
                Self::Expression(expression) => expressions.push(expression),
                Self::And(children) | Self::Or(children) => stack.extend(children.iter().rev()),
            }
        }
        expressions
    }
}

impl FromStr for MarkerTree {
    type Err = Pep508Error;

    fn from_str(markers: &str) -> Result<Self, Self::Err> {
        parse_markers_impl(&mut Cursor::new(markers))
    }
}

impl Display for MarkerTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (children, joiner) = match self {
            Self::Expression(expression) => return expression.fmt(f),
            Self::And(children) => (children, " and "),
            Self::Or(children) => (children, " or "),
        };
        for (idx, child) in children.iter().enumerate() {
            if idx > 0 {
                f.write_str(joiner)?;
            }
            match child {
                Self::Expression(expression) => write!(f, "{expression}")?,
                nested => write!(f, "({nested})")?,
            }
        }
        Ok(())
    }
}

impl Serialize for MarkerTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MarkerTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(de::Error::custom)
    }
}

/// ```text
/// marker_op = version_cmp | (wsp* 'in') | (wsp* 'not' wsp+ 'in')
/// ```
fn parse_marker_operator(cursor: &mut Cursor) -> Result<MarkerOperator, Pep508Error> {
    let (start, len) = if cursor.peek_char().is_some_and(char::is_alphabetic) {
        cursor.take_while(char::is_alphabetic)
    } else {
        cursor.take_while(|char| matches!(char, '=' | '!' | '<' | '>' | '~'))
    };
    let operator = cursor.slice(start, len);
    if operator == "not" {
        let (_, gap) = cursor.take_while(char::is_whitespace);
        let (in_start, in_len) = cursor.take_while(char::is_alphabetic);
        if gap == 0 || cursor.slice(in_start, in_len) != "in" {
            return Err(cursor.error(
                "Expected 'in' after 'not' in marker operator",
                start,
                in_start + in_len - start,
            ));
        }
        return Ok(MarkerOperator::NotIn);
    }
    MarkerOperator::from_str(operator).map_err(|_| {
        cursor.error(
            format!(
                "Expected a valid marker operator (such as '>=' or 'not in'), found '{operator}'"
            ),
            start,
            len.max(1),
        )
    })
}

/// A quoted string, or one of the marker variable names.
fn parse_marker_value(cursor: &mut Cursor) -> Result<MarkerValue, Pep508Error> {
    match cursor.peek() {
        None => Err(cursor.error(
            "Expected marker value, found end of dependency specification",
            cursor.pos(),
            1,
        )),
        Some((start_pos, quote @ ('"' | '\''))) => {
            cursor.next();
            let (start, len) = cursor.take_while(|c| c != quote);
            let value = cursor.slice(start, len).to_string();
            cursor.next_expect_char(quote, start_pos)?;
            Ok(MarkerValue::QuotedString(value))
        }
        Some(_) => {
            let (start, len) = cursor
                .take_while(|char| char.is_ascii_alphanumeric() || matches!(char, '_' | '.'));
            let key = cursor.slice(start, len);
            MarkerVariable::from_str(key)
                .map(MarkerValue::Variable)
                .map_err(|_| {
                    cursor.error(
                        format!("Expected a valid marker name, found '{key}'"),
                        start,
                        len.max(1),
                    )
                })
        }
    }
}

/// ```text
/// marker_expr = marker_var:l marker_op:o marker_var:r | wsp* '(' marker:m wsp* ')'
/// ```
fn parse_marker_expr(cursor: &mut Cursor) -> Result<MarkerTree, Pep508Error> {
    cursor.eat_whitespace();
    if let Some(start_pos) = cursor.eat_char('(') {
        let marker = parse_marker_or(cursor)?;
        cursor.eat_whitespace();
        cursor.next_expect_char(')', start_pos)?;
        return Ok(marker);
    }
    let l_value = parse_marker_value(cursor)?;
    cursor.eat_whitespace();
    let operator = parse_marker_operator(cursor)?;
    cursor.eat_whitespace();
    let r_value = parse_marker_value(cursor)?;
    Ok(MarkerTree::Expression(MarkerExpression {
        l_value,
        operator,
        r_value,
    }))
}

fn parse_marker_and(cursor: &mut Cursor) -> Result<MarkerTree, Pep508Error> {
    parse_marker_op(cursor, "and", MarkerTree::And, parse_marker_expr)
}

fn parse_marker_or(cursor: &mut Cursor) -> Result<MarkerTree, Pep508Error> {
    parse_marker_op(cursor, "or", MarkerTree::Or, parse_marker_and)
}

/// Parses a run of `inner (op inner)*`, flattening it into one n-ary node.
fn parse_marker_op(
    cursor: &mut Cursor,
    op: &str,
    constructor: fn(Vec<MarkerTree>) -> MarkerTree,
    parse_inner: fn(&mut Cursor) -> Result<MarkerTree, Pep508Error>,
) -> Result<MarkerTree, Pep508Error> {
    let mut expressions = vec![parse_inner(cursor)?];
    loop {
        cursor.eat_whitespace();
        let (start, len) = cursor.peek_while(|c| c.is_ascii_alphabetic());
        if cursor.slice(start, len) != op {
            break;
        }
        cursor.take_while(|c| c.is_ascii_alphabetic());
        expressions.push(parse_inner(cursor)?);
    }
    if expressions.len() == 1 {
        Ok(expressions.remove(0))
    } else {
        Ok(constructor(expressions))
    }
}

/// ```text
/// marker = marker_or
/// ```
pub(crate) fn parse_markers_impl(cursor: &mut Cursor) -> Result<MarkerTree, Pep508Error> {
    let marker = parse_marker_or(cursor)?;
    cursor.eat_whitespace();
    if let Some((pos, unexpected)) = cursor.next() {
        return Err(cursor.error(
            format!("Unexpected character '{unexpected}', expected 'and', 'or' or end of input"),
            pos,
            unexpected.len_utf8(),
        ));
    }
    Ok(marker)
}
