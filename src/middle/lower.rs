//! Lowering from the typed AST to the control flow graph IR.
//!
//! Every AST construct lowers to a [`Fragment`]: a subgraph with one entry,
//! one exit, and (for expressions) the register holding its value. Sequencing
//! wires the previous fragment's exit to the next fragment's entry; control
//! constructs wire their internal edges explicitly. The exit of a fragment
//! may be left dangling; whoever sequences it later fills in the successor.
//!
//! Lowering tolerates ill-typed input without faulting. It can produce
//! nonsense graphs for nonsense programs; the driver is expected to gate on
//! the checker's diagnostics before handing the result to the backend. The
//! only hard failures are structural ones the front end should never emit,
//! reported as [`CompileError`].

use hashbrown::HashMap;
use std::rc::Rc;

use crate::{
    CompileError,
    frontend::{
        Symbol,
        ast::{
            Call, DeclarationKind, DeclarationList, Expression, ExpressionKind, FunctionDefinition,
            Operation, Statement, StatementKind, StatementList,
        },
    },
    middle::{
        ir::{
            BinaryOp, Function, GlobalDecl, InstId, InstKind, LocalVar, Predicate, Program, Value,
        },
        ty::Type,
    },
};

/// A lowered subgraph with a single entry and a single exit. `value` is the
/// register holding the subgraph's result when it is an expression.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub entry: InstId,
    pub exit: InstId,
    pub value: Option<LocalVar>,
}

impl Fragment {
    fn single(id: InstId) -> Self {
        Self {
            entry: id,
            exit: id,
            value: None,
        }
    }

    fn with_value(self, value: LocalVar) -> Self {
        Self {
            value: Some(value),
            ..self
        }
    }

    fn with_value_option(self, value: Option<LocalVar>) -> Self {
        Self { value, ..self }
    }
}

/// Lowers one program. Global declarations become [`GlobalDecl`]s; each
/// function definition becomes its own [`Function`] graph.
pub fn lower(ast: &DeclarationList) -> Result<Program, CompileError> {
    let mut program = Program::default();

    for declaration in &ast.declarations {
        match &declaration.kind {
            DeclarationKind::Variable(symbol) => program.globals.push(GlobalDecl {
                symbol: symbol.clone(),
                element_count: 1,
            }),
            DeclarationKind::Array(symbol) => {
                let element_count = match symbol.ty() {
                    Some(Type::Array { extent, .. }) => *extent,
                    _ => 1,
                };
                program.globals.push(GlobalDecl {
                    symbol: symbol.clone(),
                    element_count,
                });
            }
            DeclarationKind::Function(definition) => {
                program.functions.push(lower_function(definition)?);
            }
        }
    }

    Ok(program)
}

fn lower_function(definition: &FunctionDefinition) -> Result<Function, CompileError> {
    let ty = definition
        .symbol
        .ty()
        .cloned()
        .unwrap_or_else(|| Type::Error("function symbol has no type".into()));

    let mut lowering = FunctionLowering {
        function: Function::new(definition.symbol.name(), ty),
        locals: HashMap::new(),
        loop_exits: Vec::new(),
    };

    for parameter in &definition.parameters {
        let register = lowering.function.new_temp();
        lowering.locals.insert(parameter.clone(), register);
        lowering.function.arguments.push(register);
    }

    let body = lowering.lower_statement_list(&definition.body)?;
    lowering.function.entry = Some(body.entry);

    Ok(lowering.function)
}

struct FunctionLowering {
    function: Function,
    /// Local scalars and parameters, each pinned to one register
    locals: HashMap<Rc<Symbol>, LocalVar>,
    /// The join no-op of every enclosing loop, innermost last. Break targets
    /// the top of this stack.
    loop_exits: Vec<InstId>,
}

impl FunctionLowering {
    fn emit(&mut self, kind: InstKind) -> InstId {
        self.function.emit(kind)
    }

    /// Wires the fall-through edge from one fragment's exit to the next
    /// fragment's entry. Exits with no successor slots (returns) swallow the
    /// edge; anything sequenced behind them is unreachable.
    fn link(&mut self, from: InstId, to: InstId) {
        if self.function.instruction(from).max_successors() == 0 {
            return;
        }
        self.function.set_successor(from, 0, to);
    }

    /// The value register of a fragment. Ill-typed input can leave a value
    /// position empty; a fresh register keeps lowering going and the garbage
    /// graph is discarded by the driver anyway.
    fn value_of(&mut self, fragment: &Fragment) -> LocalVar {
        fragment
            .value
            .unwrap_or_else(|| self.function.new_temp())
    }

    fn lower_statement_list(&mut self, list: &StatementList) -> Result<Fragment, CompileError> {
        let mut combined: Option<Fragment> = None;

        for statement in &list.statements {
            let fragment = self.lower_statement(statement)?;
            combined = Some(match combined {
                None => fragment,
                Some(previous) => {
                    self.link(previous.exit, fragment.entry);
                    Fragment {
                        entry: previous.entry,
                        exit: fragment.exit,
                        value: None,
                    }
                }
            });
        }

        Ok(combined.unwrap_or_else(|| Fragment::single(self.emit(InstKind::Nop))))
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<Fragment, CompileError> {
        match &statement.kind {
            StatementKind::VariableDeclaration(symbol) => {
                let register = self.function.new_temp();
                self.locals.insert(symbol.clone(), register);
                Ok(Fragment::single(self.emit(InstKind::Nop)))
            }
            // arrays live at global scope; a frame has no storage for one
            StatementKind::ArrayDeclaration(_) => {
                Err(CompileError::UnsupportedLocalArray(statement.position))
            }
            StatementKind::Assignment { location, value } => {
                self.lower_assignment(statement, location, value)
            }
            StatementKind::Call(call) => Ok(self.lower_call(call)),
            StatementKind::If {
                condition,
                then_block,
                else_block,
            } => {
                let condition = self.lower_expression(condition);
                let predicate = self.value_of(&condition);
                let jump = self.emit(InstKind::Jump { predicate });
                self.link(condition.exit, jump);

                let end = self.emit(InstKind::Nop);

                let then_block = self.lower_statement_list(then_block)?;
                self.function.set_successor(jump, 1, then_block.entry);
                self.link(then_block.exit, end);

                if else_block.statements.is_empty() {
                    self.function.set_successor(jump, 0, end);
                } else {
                    let else_block = self.lower_statement_list(else_block)?;
                    self.function.set_successor(jump, 0, else_block.entry);
                    self.link(else_block.exit, end);
                }

                Ok(Fragment {
                    entry: condition.entry,
                    exit: end,
                    value: None,
                })
            }
            StatementKind::For {
                init,
                condition,
                increment,
                body,
            } => {
                let end = self.emit(InstKind::Nop);
                self.loop_exits.push(end);

                let init = self.lower_statement(init)?;
                let condition = self.lower_expression(condition);
                let predicate = self.value_of(&condition);
                let jump = self.emit(InstKind::Jump { predicate });

                self.link(init.exit, condition.entry);
                self.link(condition.exit, jump);
                self.function.set_successor(jump, 0, end);

                let body = self.lower_statement_list(body)?;
                let increment = self.lower_statement(increment)?;

                self.function.set_successor(jump, 1, body.entry);
                self.link(body.exit, increment.entry);
                // the condition is re-evaluated on every iteration
                self.link(increment.exit, condition.entry);

                self.loop_exits.pop();

                Ok(Fragment {
                    entry: init.entry,
                    exit: end,
                    value: None,
                })
            }
            StatementKind::Break => {
                let Some(&exit) = self.loop_exits.last() else {
                    return Err(CompileError::BreakOutsideLoop(statement.position));
                };

                // control splices straight onto the loop's join point; the
                // dangling no-op soaks up whatever gets sequenced after the
                // break, which is unreachable by construction
                let dangling = self.emit(InstKind::Nop);
                Ok(Fragment {
                    entry: exit,
                    exit: dangling,
                    value: None,
                })
            }
            StatementKind::Return { value } => match value {
                Some(expression) => {
                    let value = self.lower_expression(expression);
                    let register = self.value_of(&value);
                    let ret = self.emit(InstKind::Return {
                        value: Some(register),
                    });
                    self.link(value.exit, ret);
                    Ok(Fragment {
                        entry: value.entry,
                        exit: ret,
                        value: None,
                    })
                }
                None => Ok(Fragment::single(self.emit(InstKind::Return { value: None }))),
            },
        }
    }

    fn lower_assignment(
        &mut self,
        statement: &Statement,
        location: &Expression,
        value: &Expression,
    ) -> Result<Fragment, CompileError> {
        match &location.kind {
            ExpressionKind::VarAccess(symbol) => {
                if let Some(&dst) = self.locals.get(symbol) {
                    let value = self.lower_expression(value);
                    let src = self.value_of(&value);
                    let copy = self.emit(InstKind::Copy {
                        dst,
                        src: Value::Local(src),
                    });
                    self.link(value.exit, copy);
                    Ok(Fragment {
                        entry: value.entry,
                        exit: copy,
                        value: None,
                    })
                } else {
                    let dst = self.function.new_temp_address();
                    let address = self.emit(InstKind::AddressAt {
                        dst,
                        base: symbol.clone(),
                        offset: None,
                    });
                    let value = self.lower_expression(value);
                    let src = self.value_of(&value);
                    let store = self.emit(InstKind::Store { dst, src });
                    self.link(address, value.entry);
                    self.link(value.exit, store);
                    Ok(Fragment {
                        entry: address,
                        exit: store,
                        value: None,
                    })
                }
            }
            ExpressionKind::ArrayAccess { base, index } => {
                let index = self.lower_expression(index);
                let offset = self.value_of(&index);
                let dst = self.function.new_temp_address();
                let address = self.emit(InstKind::AddressAt {
                    dst,
                    base: base.clone(),
                    offset: Some(offset),
                });
                let value = self.lower_expression(value);
                let src = self.value_of(&value);
                let store = self.emit(InstKind::Store { dst, src });
                self.link(index.exit, address);
                self.link(address, value.entry);
                self.link(value.exit, store);
                Ok(Fragment {
                    entry: index.entry,
                    exit: store,
                    value: None,
                })
            }
            _ => Err(CompileError::InvalidAssignmentTarget(statement.position)),
        }
    }

    fn lower_expression(&mut self, expression: &Expression) -> Fragment {
        match &expression.kind {
            ExpressionKind::VarAccess(symbol) => {
                if let Some(&register) = self.locals.get(symbol) {
                    Fragment::single(self.emit(InstKind::Nop)).with_value(register)
                } else {
                    let address = self.function.new_temp_address();
                    let dst = self.function.new_temp();
                    let at = self.emit(InstKind::AddressAt {
                        dst: address,
                        base: symbol.clone(),
                        offset: None,
                    });
                    let load = self.emit(InstKind::Load { dst, src: address });
                    self.link(at, load);
                    Fragment {
                        entry: at,
                        exit: load,
                        value: Some(dst),
                    }
                }
            }
            ExpressionKind::ArrayAccess { base, index } => {
                let index = self.lower_expression(index);
                let offset = self.value_of(&index);
                let address = self.function.new_temp_address();
                let dst = self.function.new_temp();
                let at = self.emit(InstKind::AddressAt {
                    dst: address,
                    base: base.clone(),
                    offset: Some(offset),
                });
                let load = self.emit(InstKind::Load { dst, src: address });
                self.link(index.exit, at);
                self.link(at, load);
                Fragment {
                    entry: index.entry,
                    exit: load,
                    value: Some(dst),
                }
            }
            ExpressionKind::LiteralBool(value) => {
                let dst = self.function.new_temp();
                let copy = self.emit(InstKind::Copy {
                    dst,
                    src: Value::Bool(*value),
                });
                Fragment::single(copy).with_value(dst)
            }
            ExpressionKind::LiteralInt(value) => {
                let dst = self.function.new_temp();
                let copy = self.emit(InstKind::Copy {
                    dst,
                    src: Value::Int(*value),
                });
                Fragment::single(copy).with_value(dst)
            }
            ExpressionKind::Call(call) => self.lower_call(call),
            ExpressionKind::Op { op, lhs, rhs } => self.lower_operation(*op, lhs, rhs.as_deref()),
        }
    }

    fn lower_operation(
        &mut self,
        op: Operation,
        lhs: &Expression,
        rhs: Option<&Expression>,
    ) -> Fragment {
        let lhs = self.lower_expression(lhs);
        let lhs_value = self.value_of(&lhs);

        if op == Operation::LogicNot {
            let dst = self.function.new_temp();
            let not = self.emit(InstKind::UnaryNot {
                dst,
                operand: lhs_value,
            });
            self.link(lhs.exit, not);
            return Fragment {
                entry: lhs.entry,
                exit: not,
                value: Some(dst),
            };
        }

        if matches!(op, Operation::LogicAnd | Operation::LogicOr) {
            return self.lower_short_circuit(op, lhs, rhs);
        }

        let Some(rhs) = rhs else {
            // a malformed tree; produce an inert placeholder and move on
            return lhs;
        };
        let rhs = self.lower_expression(rhs);
        let rhs_value = self.value_of(&rhs);
        let dst = self.function.new_temp();

        let inst = if op.is_arithmetic() {
            let op = match op {
                Operation::Add => BinaryOp::Add,
                Operation::Sub => BinaryOp::Sub,
                Operation::Mul => BinaryOp::Mul,
                _ => BinaryOp::Div,
            };
            self.emit(InstKind::BinaryOp {
                op,
                dst,
                lhs: lhs_value,
                rhs: rhs_value,
            })
        } else {
            let predicate = match op {
                Operation::Ge => Predicate::Ge,
                Operation::Gt => Predicate::Gt,
                Operation::Le => Predicate::Le,
                Operation::Lt => Predicate::Lt,
                Operation::Eq => Predicate::Eq,
                _ => Predicate::Ne,
            };
            self.emit(InstKind::Compare {
                predicate,
                dst,
                lhs: lhs_value,
                rhs: rhs_value,
            })
        };

        self.link(lhs.exit, rhs.entry);
        self.link(rhs.exit, inst);

        Fragment {
            entry: lhs.entry,
            exit: inst,
            value: Some(dst),
        }
    }

    /// `and`/`or` evaluate their right side only when the left side does not
    /// already decide the result. Both paths copy into the same destination
    /// register and meet at a shared join.
    fn lower_short_circuit(
        &mut self,
        op: Operation,
        lhs: Fragment,
        rhs: Option<&Expression>,
    ) -> Fragment {
        let lhs_value = self.value_of(&lhs);
        let dst = self.function.new_temp();

        let Some(rhs) = rhs else {
            return lhs;
        };
        let rhs = self.lower_expression(rhs);
        let rhs_value = self.value_of(&rhs);

        let jump = self.emit(InstKind::Jump {
            predicate: lhs_value,
        });
        self.link(lhs.exit, jump);

        let short = self.emit(InstKind::Copy {
            dst,
            src: Value::Local(lhs_value),
        });
        let through = self.emit(InstKind::Copy {
            dst,
            src: Value::Local(rhs_value),
        });
        let end = self.emit(InstKind::Nop);

        // `and` short-circuits on false, `or` on true
        let (short_edge, evaluate_edge) = if op == Operation::LogicAnd {
            (0, 1)
        } else {
            (1, 0)
        };
        self.function.set_successor(jump, short_edge, short);
        self.function.set_successor(jump, evaluate_edge, rhs.entry);

        self.link(rhs.exit, through);
        self.link(through, end);
        self.link(short, end);

        Fragment {
            entry: lhs.entry,
            exit: end,
            value: Some(dst),
        }
    }

    fn lower_call(&mut self, call: &Call) -> Fragment {
        let mut arguments = Vec::with_capacity(call.arguments.len());
        let mut chain: Option<Fragment> = None;

        for argument in &call.arguments {
            let fragment = self.lower_expression(argument);
            arguments.push(self.value_of(&fragment));
            chain = Some(match chain {
                None => fragment,
                Some(previous) => {
                    self.link(previous.exit, fragment.entry);
                    Fragment {
                        entry: previous.entry,
                        exit: fragment.exit,
                        value: None,
                    }
                }
            });
        }

        let dst = match call.callee.ty() {
            Some(Type::Func { ret, .. }) if !matches!(**ret, Type::Void) => {
                Some(self.function.new_temp())
            }
            _ => None,
        };

        let inst = self.emit(InstKind::Call {
            callee: call.callee.clone(),
            arguments,
            dst,
        });

        match chain {
            Some(chain) => {
                self.link(chain.exit, inst);
                Fragment {
                    entry: chain.entry,
                    exit: inst,
                    value: dst,
                }
            }
            None => Fragment::single(inst).with_value_option(dst),
        }
    }
}
