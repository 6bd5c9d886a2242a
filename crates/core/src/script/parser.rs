//! Recursive-descent parser for the script language.

use crate::error::{EngineError, EngineResult};
use crate::script::ast::*;
use crate::script::lexer::{lex, unescape_string, Tok, Token};

/// Parses a whole script source file.
pub fn parse(path: &str, source: &str) -> EngineResult<Script> {
    let tokens = lex(path, source)?;
    let mut parser = Parser {
        path,
        tokens,
        cursor: 0,
    };
    parser.script()
}

struct Parser<'a> {
    path: &'a str,
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn peek_tok(&self) -> Option<Tok> {
        self.peek().map(|token| token.tok)
    }

    fn position(&self) -> (u32, u32) {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|token| (token.line, token.column))
            .unwrap_or((1, 1))
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, tok: Tok) -> bool {
        if self.peek_tok() == Some(tok) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> EngineResult<Token> {
        if self.peek_tok() == Some(tok) {
            Ok(self.advance().expect("peeked"))
        } else {
            Err(self.error(format!(
                "expected {what}, found {}",
                self.peek()
                    .map(|token| format!("'{}'", token.text))
                    .unwrap_or_else(|| "end of file".to_string())
            )))
        }
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        let (line, column) = self.position();
        EngineError::compile(self.path, line, column, message)
    }

    fn script(&mut self) -> EngineResult<Script> {
        let mut script = Script {
            body: Vec::new(),
            functions: Vec::new(),
            methods: Vec::new(),
            events: Vec::new(),
            externals: Vec::new(),
        };
        while !self.at_end() {
            match self.peek_tok() {
                Some(Tok::Function) => {
                    let decl = self.function_decl()?;
                    script.functions.push(decl);
                }
                Some(Tok::Method) => {
                    let decl = self.function_decl()?;
                    script.methods.push(decl);
                }
                Some(Tok::On) => script.events.push(self.event_decl()?),
                Some(Tok::External) => script.externals.push(self.external_decl()?),
                _ => script.body.push(self.statement()?),
            }
        }
        Ok(script)
    }

    fn function_decl(&mut self) -> EngineResult<FunctionDecl> {
        let keyword = self.advance().expect("function or method keyword");
        let name = self.expect(Tok::Ident, "function name")?.text;
        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.eat(Tok::RParen) {
            loop {
                params.push(self.expect(Tok::Ident, "parameter name")?.text);
                if self.eat(Tok::RParen) {
                    break;
                }
                self.expect(Tok::Comma, "','")?;
            }
        }
        let body = self.brace_block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            line: keyword.line,
        })
    }

    fn event_decl(&mut self) -> EngineResult<EventDecl> {
        let keyword = self.advance().expect("on keyword");
        let name_token = self.expect(Tok::StringLit, "event name string")?;
        let body = self.brace_block()?;
        Ok(EventDecl {
            name: unescape_string(&name_token.text),
            body,
            line: keyword.line,
        })
    }

    fn external_decl(&mut self) -> EngineResult<ExternalDecl> {
        let keyword = self.advance().expect("external keyword");
        let library_token = self.expect(Tok::StringLit, "library name string")?;
        let name = self.expect(Tok::Ident, "external function name")?.text;
        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.eat(Tok::RParen) {
            loop {
                params.push(self.expect(Tok::Ident, "parameter name")?.text);
                if self.eat(Tok::RParen) {
                    break;
                }
                self.expect(Tok::Comma, "','")?;
            }
        }
        self.eat(Tok::Semi);
        Ok(ExternalDecl {
            library: unescape_string(&library_token.text),
            name,
            params,
            line: keyword.line,
        })
    }

    fn brace_block(&mut self) -> EngineResult<Vec<Stmt>> {
        self.expect(Tok::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.eat(Tok::RBrace) {
            if self.at_end() {
                return Err(self.error("unclosed block"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn statement(&mut self) -> EngineResult<Stmt> {
        match self.peek_tok() {
            Some(Tok::Var) => self.var_decl(false),
            Some(Tok::Global) => self.var_decl(true),
            Some(Tok::Const) => self.const_decl(),
            Some(Tok::If) => self.if_stmt(),
            Some(Tok::While) => self.while_stmt(),
            Some(Tok::For) => self.for_stmt(),
            Some(Tok::Switch) => self.switch_stmt(),
            Some(Tok::Return) => {
                let keyword = self.advance().expect("return");
                let value = if self.peek_tok() == Some(Tok::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.eat(Tok::Semi);
                Ok(Stmt::Return {
                    value,
                    line: keyword.line,
                })
            }
            Some(Tok::Break) => {
                let keyword = self.advance().expect("break");
                self.eat(Tok::Semi);
                Ok(Stmt::Break { line: keyword.line })
            }
            Some(Tok::Continue) => {
                let keyword = self.advance().expect("continue");
                self.eat(Tok::Semi);
                Ok(Stmt::Continue { line: keyword.line })
            }
            Some(Tok::LBrace) => Ok(Stmt::Block(self.brace_block()?)),
            Some(_) => {
                let expr = self.expression()?;
                self.eat(Tok::Semi);
                Ok(Stmt::Expr(expr))
            }
            None => Err(self.error("expected a statement")),
        }
    }

    fn var_decl(&mut self, global: bool) -> EngineResult<Stmt> {
        let keyword = self.advance().expect("var or global");
        let mut decls = Vec::new();
        loop {
            let name = self.expect(Tok::Ident, "variable name")?.text;
            let init = if self.eat(Tok::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat(Tok::Comma) {
                break;
            }
        }
        self.eat(Tok::Semi);
        if global {
            Ok(Stmt::GlobalDecl {
                decls,
                line: keyword.line,
            })
        } else {
            Ok(Stmt::VarDecl {
                decls,
                line: keyword.line,
            })
        }
    }

    fn const_decl(&mut self) -> EngineResult<Stmt> {
        let keyword = self.advance().expect("const");
        let name = self.expect(Tok::Ident, "constant name")?.text;
        self.expect(Tok::Assign, "'='")?;
        let value = self.assignment()?;
        self.eat(Tok::Semi);
        Ok(Stmt::ConstDecl {
            name,
            value,
            line: keyword.line,
        })
    }

    fn if_stmt(&mut self) -> EngineResult<Stmt> {
        self.advance();
        self.expect(Tok::LParen, "'('")?;
        let cond = self.expression()?;
        self.expect(Tok::RParen, "')'")?;
        let then_branch = self.branch_body()?;
        let else_branch = if self.eat(Tok::Else) {
            if self.peek_tok() == Some(Tok::If) {
                Some(vec![self.if_stmt()?])
            } else {
                Some(self.branch_body()?)
            }
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    /// A braced block or a single statement.
    fn branch_body(&mut self) -> EngineResult<Vec<Stmt>> {
        if self.peek_tok() == Some(Tok::LBrace) {
            self.brace_block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    fn while_stmt(&mut self) -> EngineResult<Stmt> {
        self.advance();
        self.expect(Tok::LParen, "'('")?;
        let cond = self.expression()?;
        self.expect(Tok::RParen, "')'")?;
        let body = self.branch_body()?;
        Ok(Stmt::While { cond, body })
    }

    fn for_stmt(&mut self) -> EngineResult<Stmt> {
        self.advance();
        self.expect(Tok::LParen, "'('")?;
        let init = if self.eat(Tok::Semi) {
            None
        } else if self.peek_tok() == Some(Tok::Var) {
            Some(Box::new(self.var_decl(false)?))
        } else {
            let expr = self.expression()?;
            self.eat(Tok::Semi);
            Some(Box::new(Stmt::Expr(expr)))
        };
        let cond = if self.peek_tok() == Some(Tok::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(Tok::Semi, "';'")?;
        let update = if self.peek_tok() == Some(Tok::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(Tok::RParen, "')'")?;
        let body = self.branch_body()?;
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn switch_stmt(&mut self) -> EngineResult<Stmt> {
        let keyword = self.advance().expect("switch");
        self.expect(Tok::LParen, "'('")?;
        let discriminant = self.expression()?;
        self.expect(Tok::RParen, "')'")?;
        self.expect(Tok::LBrace, "'{'")?;

        let mut cases = Vec::new();
        while !self.eat(Tok::RBrace) {
            let test = match self.peek_tok() {
                Some(Tok::Case) => {
                    self.advance();
                    let test = self.expression()?;
                    self.expect(Tok::Colon, "':'")?;
                    Some(test)
                }
                Some(Tok::Default) => {
                    self.advance();
                    self.expect(Tok::Colon, "':'")?;
                    None
                }
                _ => return Err(self.error("expected 'case', 'default', or '}'")),
            };
            let mut body = Vec::new();
            while !matches!(
                self.peek_tok(),
                Some(Tok::Case) | Some(Tok::Default) | Some(Tok::RBrace) | None
            ) {
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
            line: keyword.line,
        })
    }

    fn expression(&mut self) -> EngineResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> EngineResult<Expr> {
        let target = self.ternary()?;
        let op = match self.peek_tok() {
            Some(Tok::Assign) => None,
            Some(Tok::PlusAssign) => Some(BinOp::Add),
            Some(Tok::MinusAssign) => Some(BinOp::Sub),
            Some(Tok::StarAssign) => Some(BinOp::Mul),
            Some(Tok::SlashAssign) => Some(BinOp::Div),
            Some(Tok::PercentAssign) => Some(BinOp::Mod),
            _ => return Ok(target),
        };
        if !target.is_assign_target() {
            return Err(self.error("left side of assignment is not assignable"));
        }
        let (line, column) = (target.line, target.column);
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            line,
            column,
        ))
    }

    fn ternary(&mut self) -> EngineResult<Expr> {
        let cond = self.logical_or()?;
        if !self.eat(Tok::Question) {
            return Ok(cond);
        }
        let then_branch = self.assignment()?;
        self.expect(Tok::Colon, "':'")?;
        let else_branch = self.assignment()?;
        let (line, column) = (cond.line, cond.column);
        Ok(Expr::new(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            line,
            column,
        ))
    }

    fn logical_or(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.eat(Tok::OrOr) {
            let rhs = self.logical_and()?;
            let (line, column) = (lhs.line, lhs.column);
            lhs = Expr::new(
                ExprKind::Logical {
                    op: LogOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
                column,
            );
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.equality()?;
        while self.eat(Tok::AndAnd) {
            let rhs = self.equality()?;
            let (line, column) = (lhs.line, lhs.column);
            lhs = Expr::new(
                ExprKind::Logical {
                    op: LogOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
                column,
            );
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek_tok() {
                Some(Tok::EqEq) => BinOp::Eq,
                Some(Tok::NotEq) => BinOp::Ne,
                Some(Tok::StrictEq) => BinOp::StrictEq,
                Some(Tok::StrictNe) => BinOp::StrictNe,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.relational()?;
            let (line, column) = (lhs.line, lhs.column);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
                column,
            );
        }
    }

    fn relational(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek_tok() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Ge) => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.additive()?;
            let (line, column) = (lhs.line, lhs.column);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
                column,
            );
        }
    }

    fn additive(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_tok() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.multiplicative()?;
            let (line, column) = (lhs.line, lhs.column);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
                column,
            );
        }
    }

    fn multiplicative(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_tok() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            let (line, column) = (lhs.line, lhs.column);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
                column,
            );
        }
    }

    fn unary(&mut self) -> EngineResult<Expr> {
        let (line, column) = self.position();
        let op = match self.peek_tok() {
            Some(Tok::Bang) => Some(UnOp::Not),
            Some(Tok::Minus) => Some(UnOp::Neg),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                line,
                column,
            ));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> EngineResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_tok() {
                Some(Tok::Dot) => {
                    self.advance();
                    let name = self.expect(Tok::Ident, "member name")?.text;
                    if self.peek_tok() == Some(Tok::LParen) {
                        let args = self.call_args()?;
                        let (line, column) = (expr.line, expr.column);
                        expr = Expr::new(
                            ExprKind::MethodCall {
                                object: Box::new(expr),
                                name,
                                args,
                            },
                            line,
                            column,
                        );
                    } else {
                        let (line, column) = (expr.line, expr.column);
                        expr = Expr::new(
                            ExprKind::Member {
                                object: Box::new(expr),
                                name,
                            },
                            line,
                            column,
                        );
                    }
                }
                Some(Tok::LBracket) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Tok::RBracket, "']'")?;
                    let (line, column) = (expr.line, expr.column);
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                        column,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> EngineResult<Vec<Expr>> {
        self.expect(Tok::LParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat(Tok::RParen) {
                return Ok(args);
            }
            self.expect(Tok::Comma, "','")?;
        }
    }

    fn primary(&mut self) -> EngineResult<Expr> {
        let (line, column) = self.position();
        match self.peek_tok() {
            Some(Tok::Null) => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, line, column))
            }
            Some(Tok::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), line, column))
            }
            Some(Tok::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), line, column))
            }
            Some(Tok::This) => {
                self.advance();
                Ok(Expr::new(ExprKind::This, line, column))
            }
            Some(Tok::IntLit) => {
                let token = self.advance().expect("int literal");
                let value = token
                    .text
                    .parse::<i32>()
                    .map_err(|_| self.error(format!("integer literal '{}' overflows", token.text)))?;
                Ok(Expr::new(ExprKind::Int(value), line, column))
            }
            Some(Tok::FloatLit) => {
                let token = self.advance().expect("float literal");
                let value = token
                    .text
                    .parse::<f64>()
                    .map_err(|_| self.error(format!("bad float literal '{}'", token.text)))?;
                Ok(Expr::new(ExprKind::Float(value), line, column))
            }
            Some(Tok::StringLit) => {
                let token = self.advance().expect("string literal");
                Ok(Expr::new(
                    ExprKind::Str(unescape_string(&token.text)),
                    line,
                    column,
                ))
            }
            Some(Tok::New) => {
                self.advance();
                let class = self.expect(Tok::Ident, "class name")?.text;
                let args = if self.peek_tok() == Some(Tok::LParen) {
                    self.call_args()?
                } else {
                    Vec::new()
                };
                Ok(Expr::new(ExprKind::New { class, args }, line, column))
            }
            Some(Tok::Ident) => {
                let name = self.advance().expect("identifier").text;
                if self.peek_tok() == Some(Tok::LParen) {
                    let args = self.call_args()?;
                    Ok(Expr::new(ExprKind::Call { name, args }, line, column))
                } else {
                    Ok(Expr::new(ExprKind::Ident(name), line, column))
                }
            }
            Some(Tok::LParen) => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Some(Tok::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(Tok::RBracket) {
                    loop {
                        items.push(self.assignment()?);
                        if self.eat(Tok::RBracket) {
                            break;
                        }
                        self.expect(Tok::Comma, "','")?;
                    }
                }
                Ok(Expr::new(ExprKind::ArrayLit(items), line, column))
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declarations_and_body() {
        let source = r#"
external "kernel" MessageBox(text);

global score = 0;

function add(a, b) {
    return a + b;
}

method Interact() {
    this.Used = true;
}

on "LeftClick" {
    score = score + 1;
}

var started = true;
"#;
        let script = parse("t.script", source).expect("parse");
        assert_eq!(script.functions.len(), 1);
        assert_eq!(script.functions[0].params, ["a", "b"]);
        assert_eq!(script.methods.len(), 1);
        assert_eq!(script.events.len(), 1);
        assert_eq!(script.events[0].name, "LeftClick");
        assert_eq!(script.externals.len(), 1);
        assert_eq!(script.externals[0].library, "kernel");
        assert_eq!(script.body.len(), 2);
    }

    #[test]
    fn precedence_binds_mul_over_add_over_compare() {
        let script = parse("t.script", "var r = 1 + 2 * 3 < 10;").expect("parse");
        let Stmt::VarDecl { decls, .. } = &script.body[0] else {
            panic!()
        };
        let init = decls[0].1.as_ref().expect("initializer");
        let ExprKind::Binary { op: BinOp::Lt, lhs, .. } = &init.kind else {
            panic!("expected comparison at the root, got {init:?}")
        };
        let ExprKind::Binary { op: BinOp::Add, rhs, .. } = &lhs.kind else {
            panic!("expected addition under comparison")
        };
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn postfix_chains_and_method_calls() {
        let script = parse("t.script", "Scene.GetEntity(\"door\").Name = items[2];")
            .expect("parse");
        let Stmt::Expr(expr) = &script.body[0] else {
            panic!()
        };
        let ExprKind::Assign { target, op: None, value } = &expr.kind else {
            panic!("expected assignment")
        };
        let ExprKind::Member { object, name } = &target.kind else {
            panic!("expected member target")
        };
        assert_eq!(name, "Name");
        assert!(matches!(&object.kind, ExprKind::MethodCall { name, .. } if name == "GetEntity"));
        assert!(matches!(&value.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn for_and_switch_shapes() {
        let source = r#"
for (var i = 0; i < 3; i += 1) {
    Print(i);
}
switch (x) {
    case 1:
        Print("one");
        break;
    default:
        Print("many");
}
"#;
        let script = parse("t.script", source).expect("parse");
        assert!(matches!(&script.body[0], Stmt::For { init: Some(_), cond: Some(_), update: Some(_), .. }));
        let Stmt::Switch { cases, .. } = &script.body[1] else {
            panic!()
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[0].test.is_some());
        assert!(cases[1].test.is_none());
    }

    #[test]
    fn dangling_else_attaches_to_nearest_if() {
        let script = parse(
            "t.script",
            "if (a) if (b) Print(1); else Print(2);",
        )
        .expect("parse");
        let Stmt::If { else_branch, then_branch, .. } = &script.body[0] else {
            panic!()
        };
        assert!(else_branch.is_none(), "outer if has no else");
        let Stmt::If { else_branch: inner_else, .. } = &then_branch[0] else {
            panic!()
        };
        assert!(inner_else.is_some(), "inner if took the else");
    }

    #[test]
    fn errors_carry_position() {
        let err = parse("t.script", "var = 3;").expect_err("bad");
        assert!(err.to_string().starts_with("t.script:1:"), "{err}");
        let err = parse("t.script", "1 + 2 = 3;").expect_err("bad target");
        assert!(err.to_string().contains("not assignable"));
    }

    #[test]
    fn ternary_and_logical_nest() {
        let script = parse("t.script", "var r = a && b || c ? 1 : 2;").expect("parse");
        let Stmt::VarDecl { decls, .. } = &script.body[0] else {
            panic!()
        };
        let init = decls[0].1.as_ref().expect("init");
        let ExprKind::Ternary { cond, .. } = &init.kind else {
            panic!("ternary at root")
        };
        assert!(matches!(
            &cond.kind,
            ExprKind::Logical { op: LogOp::Or, .. }
        ));
    }
}
