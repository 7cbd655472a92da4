//! Template expressions: `{{ $steps[1].json.status }}`.
//!
//! A small hand-written interpreter over `serde_json::Value`. The grammar is
//! property access only:
//!
//! ```text
//! expr    := primary postfix*
//! primary := '$' ident | number | string | 'true' | 'false' | 'null' | '(' expr ')'
//! postfix := '.' ident | '[' expr ']'
//! ```
//!
//! Evaluation never fails loudly: a parse error, unknown root, or missing
//! property yields `None` ("undefined").

use serde_json::{Map, Number, Value};

use super::context::ExpressionContext;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Resolve every `{{ expr }}` in `template`.
///
/// A template that is exactly one placeholder (surrounding whitespace
/// allowed) yields the raw value, with undefined/null mapped to `""`.
/// Otherwise each placeholder is replaced by its string coercion.
pub fn resolve_template(template: &str, ctx: &ExpressionContext) -> Value {
    let trimmed = template.trim();
    if let Some((start, end, expr)) = next_placeholder(trimmed, 0)
        && start == 0
        && end == trimmed.len()
    {
        return match evaluate(expr, ctx) {
            None | Some(Value::Null) => Value::String(String::new()),
            Some(v) => v,
        };
    }

    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    while let Some((start, end, expr)) = next_placeholder(template, cursor) {
        out.push_str(&template[cursor..start]);
        if let Some(v) = evaluate(expr, ctx) {
            out.push_str(&to_js_string(&v));
        }
        cursor = end;
    }
    out.push_str(&template[cursor..]);
    Value::String(out)
}

/// Apply [`resolve_template`] to every string leaf of `value`.
pub fn resolve_config(value: &Value, ctx: &ExpressionContext) -> Value {
    match value {
        Value::String(s) => resolve_template(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_config(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_config(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve a template and coerce the result to a string.
pub fn resolve_to_string(template: &str, ctx: &ExpressionContext) -> String {
    to_js_string(&resolve_template(template, ctx))
}

/// Find the next `{{ ... }}` at or after `from`: `(start, end, trimmed inner)`.
///
/// The inner text is the shortest non-empty run before a closing `}}`.
fn next_placeholder(s: &str, from: usize) -> Option<(usize, usize, &str)> {
    let open = s.get(from..)?.find("{{")? + from;
    let inner_start = open + 2;
    // At least one character between the braces.
    let first = s[inner_start..].chars().next()?;
    let close_from = inner_start + first.len_utf8();
    let close = s[close_from..].find("}}")? + close_from;
    Some((open, close + 2, s[inner_start..close].trim()))
}

// ---------------------------------------------------------------------------
// String coercion
// ---------------------------------------------------------------------------

/// JS-like `String(value)`: strings verbatim, shortest number form, objects
/// and arrays as compact JSON, null as `""`.
pub fn to_js_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_to_string(n),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn number_to_string(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}

/// JS-like `Number(value)`; `NaN` when not numeric.
pub fn to_js_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() { 0.0 } else { t.parse().unwrap_or(f64::NAN) }
        }
        Some(Value::Array(items)) => match items.as_slice() {
            [] => 0.0,
            [single] => to_js_number(Some(single)),
            _ => f64::NAN,
        },
        Some(Value::Object(_)) => f64::NAN,
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate one expression. `None` is "undefined".
pub fn evaluate(expr: &str, ctx: &ExpressionContext) -> Option<Value> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return None;
    }
    eval(&ast, ctx)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Var(String),
    Ident(String),
    Number(f64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return None;
                }
                tokens.push(Token::Var(chars[start..i].iter().collect()));
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    let ch = *chars.get(i)?;
                    i += 1;
                    match ch {
                        '\\' => {
                            let esc = *chars.get(i)?;
                            i += 1;
                            s.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        ch if ch == quote => break,
                        ch => s.push(ch),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(text.parse().ok()?));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return None,
        }
    }
    Some(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Root(String),
    Literal(Value),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expect(&mut self, token: Token) -> Option<()> {
        (self.next()? == token).then_some(())
    }

    fn expr(&mut self) -> Option<Expr> {
        let mut node = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next()? {
                        Token::Ident(name) => node = Expr::Member(Box::new(node), name),
                        _ => return None,
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(Token::RBracket)?;
                    node = Expr::Index(Box::new(node), Box::new(index));
                }
                _ => return Some(node),
            }
        }
    }

    fn primary(&mut self) -> Option<Expr> {
        match self.next()? {
            Token::Var(name) => Some(Expr::Root(name)),
            Token::Number(n) => Some(Expr::Literal(number_value(n))),
            Token::Str(s) => Some(Expr::Literal(Value::String(s))),
            Token::Ident(word) => match word.as_str() {
                "true" => Some(Expr::Literal(Value::Bool(true))),
                "false" => Some(Expr::Literal(Value::Bool(false))),
                "null" => Some(Expr::Literal(Value::Null)),
                _ => None,
            },
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Some(inner)
            }
            _ => None,
        }
    }
}

pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn eval(expr: &Expr, ctx: &ExpressionContext) -> Option<Value> {
    match expr {
        Expr::Root(name) => ctx.root(name),
        Expr::Literal(v) => Some(v.clone()),
        Expr::Member(target, name) => member(&eval(target, ctx)?, name),
        Expr::Index(target, index) => {
            let target = eval(target, ctx)?;
            let key = eval(index, ctx)?;
            match (&target, &key) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = n.as_f64()?;
                    if i < 0.0 || i.fract() != 0.0 {
                        return None;
                    }
                    items.get(i as usize).cloned()
                }
                _ => member(&target, &to_js_string(&key)),
            }
        }
    }
}

/// Property lookup with the virtual `length`.
fn member(target: &Value, name: &str) -> Option<Value> {
    match target {
        Value::Object(map) => map.get(name).cloned().or_else(|| length_of_object(map, name)),
        Value::Array(items) => {
            if name == "length" {
                Some(Value::from(items.len()))
            } else {
                name.parse::<usize>().ok().and_then(|i| items.get(i).cloned())
            }
        }
        Value::String(s) if name == "length" => Some(Value::from(s.encode_utf16().count())),
        _ => None,
    }
}

fn length_of_object(map: &Map<String, Value>, name: &str) -> Option<Value> {
    (name == "length").then(|| Value::from(map.len()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExpressionContext {
        let mut ctx = ExpressionContext::new("2026-01-01T00:00:00Z");
        ctx.steps.insert(
            "1".to_string(),
            json!({ "json": { "status": 200, "name": "Alice", "tags": ["a", "b"] }, "statusCode": 200 }),
        );
        ctx.steps.insert("2a".to_string(), json!({ "json": { "ok": true } }));
        ctx.trigger = Some(json!({ "json": { "body": { "id": 7 } } }));
        ctx.item = Some(json!({ "name": "first" }));
        ctx.index = Some(0);
        ctx.input = Some(json!({ "count": 3, "ratio": 1.5 }));
        ctx.branches.on_true = Some(json!({ "side": "yes" }));
        ctx
    }

    // -----------------------------------------------------------------------
    // resolve_template
    // -----------------------------------------------------------------------

    #[test]
    fn test_single_placeholder_returns_raw_number() {
        assert_eq!(resolve_template("{{ $steps[1].json.status }}", &ctx()), json!(200));
    }

    #[test]
    fn test_single_placeholder_with_outer_whitespace() {
        assert_eq!(resolve_template("  {{$steps[1].json.tags}} ", &ctx()), json!(["a", "b"]));
    }

    #[test]
    fn test_interpolation_coerces_to_string() {
        assert_eq!(
            resolve_template("Hello {{ $steps[1].json.name }}!", &ctx()),
            json!("Hello Alice!")
        );
        assert_eq!(
            resolve_template("{{ $input.count }}/{{ $input.ratio }}", &ctx()),
            json!("3/1.5")
        );
    }

    #[test]
    fn test_missing_property_is_empty_string() {
        assert_eq!(resolve_template("{{ $steps[1].json.nope }}", &ctx()), json!(""));
        assert_eq!(resolve_template("x{{ $steps[9].json }}y", &ctx()), json!("xy"));
    }

    #[test]
    fn test_malformed_expression_is_empty_string() {
        assert_eq!(resolve_template("{{ $steps[1 }}", &ctx()), json!(""));
        assert_eq!(resolve_template("{{ alert(1) }}", &ctx()), json!(""));
        assert_eq!(resolve_template("a {{ 1 + 2 }} b", &ctx()), json!("a  b"));
    }

    #[test]
    fn test_text_without_placeholders_is_untouched() {
        assert_eq!(resolve_template("plain {text}", &ctx()), json!("plain {text}"));
        assert_eq!(resolve_template("{{}}", &ctx()), json!("{{}}"));
    }

    #[test]
    fn test_two_placeholders_are_not_a_single_value() {
        assert_eq!(
            resolve_template("{{ $index }}{{ $input.count }}", &ctx()),
            json!("03")
        );
    }

    #[test]
    fn test_objects_interpolate_as_compact_json() {
        assert_eq!(
            resolve_template("item={{ $item }}", &ctx()),
            json!(r#"item={"name":"first"}"#)
        );
    }

    // -----------------------------------------------------------------------
    // Roots and access
    // -----------------------------------------------------------------------

    #[test]
    fn test_step_lookup_by_label() {
        assert_eq!(evaluate(r#"$steps["2a"].json.ok"#, &ctx()), Some(json!(true)));
        assert_eq!(evaluate("$steps['1'].statusCode", &ctx()), Some(json!(200)));
    }

    #[test]
    fn test_roots() {
        let c = ctx();
        assert_eq!(evaluate("$trigger.json.body.id", &c), Some(json!(7)));
        assert_eq!(evaluate("$item.name", &c), Some(json!("first")));
        assert_eq!(evaluate("$index", &c), Some(json!(0)));
        assert_eq!(evaluate("$now", &c), Some(json!("2026-01-01T00:00:00Z")));
        assert_eq!(evaluate("$branches.true.side", &c), Some(json!("yes")));
        assert_eq!(evaluate("$branches.false", &c), None);
        assert_eq!(evaluate("$unknown", &c), None);
    }

    #[test]
    fn test_virtual_length() {
        let c = ctx();
        assert_eq!(evaluate("$steps[1].json.tags.length", &c), Some(json!(2)));
        assert_eq!(evaluate("$steps[1].json.name.length", &c), Some(json!(5)));
        assert_eq!(evaluate("$input.length", &c), Some(json!(2)));
    }

    #[test]
    fn test_array_index_and_literals() {
        let c = ctx();
        assert_eq!(evaluate("$steps[1].json.tags[1]", &c), Some(json!("b")));
        assert_eq!(evaluate("$steps[1].json.tags[5]", &c), None);
        assert_eq!(evaluate("'x'", &c), Some(json!("x")));
        assert_eq!(evaluate("null", &c), Some(Value::Null));
        assert_eq!(evaluate("-2.5", &c), Some(json!(-2.5)));
    }

    // -----------------------------------------------------------------------
    // resolve_config / coercion
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_config_walks_nested_structures() {
        let cfg = json!({
            "url": "https://api/{{ $input.count }}",
            "headers": [{ "key": "X", "value": "{{ $steps[1].json.status }}" }],
            "timeout": 5000,
            "flag": true
        });
        let out = resolve_config(&cfg, &ctx());
        assert_eq!(out["url"], "https://api/3");
        assert_eq!(out["headers"][0]["value"], json!(200));
        assert_eq!(out["timeout"], 5000);
        assert_eq!(out["flag"], true);
    }

    #[test]
    fn test_js_string_and_number_coercion() {
        assert_eq!(to_js_string(&json!(2.0)), "2");
        assert_eq!(to_js_string(&json!(1.5)), "1.5");
        assert_eq!(to_js_string(&json!(null)), "");
        assert_eq!(to_js_string(&json!([1, "a"])), r#"[1,"a"]"#);
        assert_eq!(to_js_number(Some(&json!(" 42 "))), 42.0);
        assert_eq!(to_js_number(Some(&json!(""))), 0.0);
        assert!(to_js_number(Some(&json!("abc"))).is_nan());
        assert!(to_js_number(None).is_nan());
    }
}
