//! 规则条件表达式 (Rule condition expressions)
//!
//! 配置加载时编译为语法树, 每个 tick 针对变量表求值; 不执行任何动态代码。
//!
//! 语法 (优先级从低到高):
//! ```text
//! or      := and ( ("||" | "or") and )*
//! and     := not ( ("&&" | "and") not )*
//! not     := "not" not | cmp
//! cmp     := sum ( ("==" | "!=" | "<" | "<=" | ">" | ">=") sum )*
//! sum     := term ( ("+" | "-") term )*
//! term    := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("!" | "-") unary | atom
//! atom    := number | ident | "true" | "false" | "(" or ")"
//! ```
//! 非零即真; 布尔运算结果为 1.0 / 0.0。

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::ExprError;

/// 每个 tick 构建的变量表
pub type Variables = HashMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Num(n) => write!(f, "{}", n),
            Tok::Ident(s) => f.write_str(s),
            Tok::Op(op) => f.write_str(op),
            Tok::LParen => f.write_str("("),
            Tok::RParen => f.write_str(")"),
        }
    }
}

const OPERATORS: [&str; 14] = [
    "||", "&&", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn tokenize(src: &str) -> Result<Vec<(Tok, usize)>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text.parse::<f64>().map_err(|_| ExprError::InvalidNumber(text.clone()))?;
            out.push((Tok::Num(n), start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let tok = match word.as_str() {
                "and" => Tok::Op("&&"),
                "or" => Tok::Op("||"),
                "not" => Tok::Op("not"),
                _ => Tok::Ident(word),
            };
            out.push((tok, start));
            continue;
        }

        match c {
            '(' => out.push((Tok::LParen, i)),
            ')' => out.push((Tok::RParen, i)),
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| op.len() == 2 && two == **op)
                    .or_else(|| OPERATORS.iter().find(|op| op.len() == 1 && op.starts_with(c)))
                    .copied()
                    .ok_or(ExprError::UnexpectedChar { ch: c, pos: i })?;
                out.push((Tok::Op(op), i));
                i += op.len();
                continue;
            }
        }
        i += 1;
    }
    Ok(out)
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.toks.get(self.pos) {
            Some((Tok::Op(op), _)) => Some(*op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<(Tok, usize)> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut lhs = next(self)?;
        while let Some(op) = self.peek_op() {
            let Some(&(_, bin)) = ops.iter().find(|(s, _)| *s == op) else {
                break;
            };
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(bin, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("||", BinOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("&&", BinOp::And)], Self::not)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.peek_op() == Some("not") {
            self.pos += 1;
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.not()?)));
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
                ("<", BinOp::Lt),
                ("<=", BinOp::Le),
                (">", BinOp::Gt),
                (">=", BinOp::Ge),
            ],
            Self::sum,
        )
    }

    fn sum(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek_op() {
            Some("!") => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?)))
            }
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some((Tok::Num(n), _)) => Ok(Expr::Num(n)),
            Some((Tok::Ident(name), _)) => Ok(match name.as_str() {
                "true" | "True" => Expr::Num(1.0),
                "false" | "False" => Expr::Num(0.0),
                _ => Expr::Var(name),
            }),
            Some((Tok::LParen, _)) => {
                let inner = self.or()?;
                match self.next() {
                    Some((Tok::RParen, _)) => Ok(inner),
                    Some((tok, pos)) => Err(ExprError::UnexpectedToken {
                        token: tok.to_string(),
                        pos,
                    }),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some((tok, pos)) => Err(ExprError::UnexpectedToken {
                token: tok.to_string(),
                pos,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl Expr {
    fn eval(&self, vars: &Variables) -> Result<f64, ExprError> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Var(name) => vars
                .get(name)
                .copied()
                .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
            Expr::Unary(UnOp::Not, e) => Ok(flag(!truthy(e.eval(vars)?))),
            Expr::Unary(UnOp::Neg, e) => Ok(-e.eval(vars)?),
            Expr::Binary(BinOp::Or, a, b) => {
                Ok(flag(truthy(a.eval(vars)?) || truthy(b.eval(vars)?)))
            }
            Expr::Binary(BinOp::And, a, b) => {
                Ok(flag(truthy(a.eval(vars)?) && truthy(b.eval(vars)?)))
            }
            Expr::Binary(op, a, b) => {
                let (x, y) = (a.eval(vars)?, b.eval(vars)?);
                Ok(match op {
                    BinOp::Eq => flag(x == y),
                    BinOp::Ne => flag(x != y),
                    BinOp::Lt => flag(x < y),
                    BinOp::Le => flag(x <= y),
                    BinOp::Gt => flag(x > y),
                    BinOp::Ge => flag(x >= y),
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div | BinOp::Rem if y == 0.0 => return Err(ExprError::DivisionByZero),
                    BinOp::Div => x / y,
                    BinOp::Rem => x % y,
                    BinOp::Or | BinOp::And => unreachable!("short-circuit ops handled above"),
                })
            }
        }
    }

    fn collect_idents<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => {
                out.insert(name);
            }
            Expr::Unary(_, e) => e.collect_idents(out),
            Expr::Binary(_, a, b) => {
                a.collect_idents(out);
                b.collect_idents(out);
            }
        }
    }
}

/// 已编译的规则条件
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    ast: Expr,
}

impl Condition {
    /// 编译条件; 空串或语法错误在加载时即拒绝
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let toks = tokenize(source)?;
        let mut parser = Parser { toks, pos: 0 };
        let ast = parser.or()?;
        if let Some((tok, pos)) = parser.next() {
            return Err(ExprError::UnexpectedToken {
                token: tok.to_string(),
                pos,
            });
        }
        Ok(Self {
            source: source.trim().to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 恒真条件 (字面量 `true`)
    pub fn is_tautology(&self) -> bool {
        matches!(self.ast, Expr::Num(n) if truthy(n))
    }

    pub fn eval(&self, vars: &Variables) -> Result<f64, ExprError> {
        self.ast.eval(vars)
    }

    pub fn is_true(&self, vars: &Variables) -> Result<bool, ExprError> {
        self.eval(vars).map(truthy)
    }

    /// 条件引用的全部变量名
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.ast.collect_idents(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, f64)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn check(src: &str, v: &Variables) -> bool {
        Condition::compile(src).unwrap().is_true(v).unwrap()
    }

    #[test]
    fn test_true_literal_is_tautology() {
        let c = Condition::compile("true").unwrap();
        assert!(c.is_tautology());
        assert!(c.is_true(&Variables::new()).unwrap());
        assert!(!Condition::compile("x > 1").unwrap().is_tautology());
    }

    #[test]
    fn test_precedence() {
        let v = vars(&[("a", 2.0), ("b", 3.0)]);
        assert!(check("a + b * 2 == 8", &v));
        assert!(check("(a + b) * 2 == 10", &v));
        assert!(check("a < b && b < 4 || a > 100", &v));
        assert!(check("-a + 5 == b", &v));
        assert!(check("10 % 4 == a", &v));
    }

    #[test]
    fn test_word_operators() {
        let v = vars(&[("bird_y", 900.0), ("gap_center_y", 1000.0), ("pipe_found", 1.0)]);
        assert!(check("pipe_found and bird_y > gap_center_y - 150", &v));
        assert!(check("not bird_y > gap_center_y", &v));
        assert!(check("!0 or false", &v));
    }

    #[test]
    fn test_syntax_errors_rejected_at_compile() {
        assert_eq!(Condition::compile(""), Err(ExprError::UnexpectedEnd));
        assert!(Condition::compile("a >").is_err());
        assert!(Condition::compile("(a > 1").is_err());
        assert!(Condition::compile("a > 1)").is_err());
        assert!(matches!(
            Condition::compile("a = 1"),
            Err(ExprError::UnexpectedChar { ch: '=', .. })
        ));
        assert!(matches!(
            Condition::compile("__import__('os')"),
            Err(ExprError::UnexpectedChar { ch: '\'', .. })
        ));
        assert!(Condition::compile("1.2.3 > 0").is_err());
    }

    #[test]
    fn test_runtime_errors() {
        let c = Condition::compile("missing > 1").unwrap();
        assert_eq!(
            c.is_true(&Variables::new()),
            Err(ExprError::UnknownIdentifier("missing".into()))
        );
        let c = Condition::compile("1 / zero").unwrap();
        assert_eq!(c.eval(&vars(&[("zero", 0.0)])), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_short_circuit_skips_unknown() {
        assert!(check("1 || missing", &Variables::new()));
        assert!(!check("0 && missing", &Variables::new()));
    }

    #[test]
    fn test_identifiers() {
        let c = Condition::compile("a > b && (c + a) < 3").unwrap();
        assert_eq!(c.identifiers().into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }
}
