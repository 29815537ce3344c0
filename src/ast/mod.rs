//! The Argon AST.
//!
//! Every expression and statement is one [`Cmd`], a single tagged enum
//! covering literals, access and assignment forms, operators, control
//! structures, the statically-distinguished call flavors, native splices,
//! and the task-machine nodes produced by lowering.
//!
//! A `Cmd` starts life in an unresolved shape (`Access`, `Assign`,
//! `ElementAccess`, operator nodes over unresolved operands) and is
//! rewritten during resolution into progressively more specific shapes
//! (`ReadLocal`, `CallDynamicMethod`, ...). The uniform interface is spread
//! over several files: structural queries here, `resolve` in
//! [`crate::resolve`], `trace_used_code` in [`crate::cull`], and
//! `write_target` in [`crate::codegen_c`].
//!
//! Every variant carries the [`SourcePos`] of the token that produced it.

use crate::error::SourcePos;
use crate::intern::Symbol;
use crate::program::{MethodId, TypeId};

/// A `which` branch: several candidate values sharing one statement list.
#[derive(Clone, Debug)]
pub struct WhichCase {
    pub pos: SourcePos,
    pub values: Vec<Cmd>,
    pub statements: Vec<Cmd>,
}

/// A `switch` branch: one constant value, one statement list.
#[derive(Clone, Debug)]
pub struct SwitchCase {
    pub pos: SourcePos,
    pub value: Cmd,
    pub statements: Vec<Cmd>,
}

/// A `catch` clause; the caught value binds to a local.
#[derive(Clone, Debug)]
pub struct CatchClause {
    pub pos: SourcePos,
    pub name: Symbol,
    pub local_index: usize,
    pub catch_type: Symbol,
    pub resolved_type: Option<TypeId>,
    pub statements: Vec<Cmd>,
}

/// One parameter of a `function` literal.
#[derive(Clone, Debug)]
pub struct FunctionParameter {
    pub pos: SourcePos,
    pub name: Symbol,
    pub declared_type: Option<Symbol>,
}

#[derive(Clone, Debug)]
pub enum Cmd {
    // =====================================================================
    // Literals
    // =====================================================================
    LiteralInteger { pos: SourcePos, value: i32 },
    LiteralLong { pos: SourcePos, value: i64 },
    LiteralReal { pos: SourcePos, value: f64 },
    LiteralCharacter { pos: SourcePos, value: char },
    LiteralLogical { pos: SourcePos, value: bool },
    /// `index` is filled from the program's literal-string pool during
    /// resolution.
    LiteralString { pos: SourcePos, value: String, index: Option<usize> },
    LiteralNull { pos: SourcePos },
    /// The current object; typed by the enclosing method's owner once
    /// resolved.
    This { pos: SourcePos, of_type: Option<TypeId> },
    /// `prior`, the context marker for calling the overridden implementation.
    Prior { pos: SourcePos },
    DefaultValue { pos: SourcePos, of_type: TypeId },
    CreateCompound { pos: SourcePos, of_type: TypeId, args: Vec<Cmd> },
    /// `{a, b}` before the target compound type is known from context.
    CreateCompoundLiteral { pos: SourcePos, args: Vec<Cmd> },
    CreateList { pos: SourcePos, args: Vec<Cmd> },
    CreateArray { pos: SourcePos, element_type: TypeId, count: Box<Cmd> },
    CreateOptionalValue { pos: SourcePos, of_type: TypeId, value: Option<Box<Cmd>> },
    CreateObject { pos: SourcePos, of_type: TypeId, init: Option<MethodId>, args: Vec<Cmd> },
    CreateCallback { pos: SourcePos, context: Option<Box<Cmd>>, method: MethodId },
    CreateFunction {
        pos: SourcePos,
        parameters: Vec<FunctionParameter>,
        return_type: Option<Symbol>,
        statements: Vec<Cmd>,
    },
    FormattedString { pos: SourcePos, format: String, parts: Vec<Cmd> },

    // =====================================================================
    // Access and assignment
    // =====================================================================
    /// Unresolved name access or call: `name`, `context.name`,
    /// `name(args)`. Resolution rewrites this into one of the specific
    /// read/call/create shapes below.
    Access {
        pos: SourcePos,
        context: Option<Box<Cmd>>,
        name: Symbol,
        args: Option<Vec<Cmd>>,
    },
    /// Unresolved `collection[index]`.
    ElementAccess { pos: SourcePos, context: Box<Cmd>, index: Box<Cmd> },
    ReadLocal { pos: SourcePos, local_index: usize },
    ReadGlobal { pos: SourcePos, owner: TypeId, name: Symbol },
    ReadProperty { pos: SourcePos, context: Box<Cmd>, owner: TypeId, name: Symbol },
    ReadArrayElement { pos: SourcePos, array: Box<Cmd>, index: Box<Cmd> },
    ReadArrayCount { pos: SourcePos, array: Box<Cmd> },
    ReadSingleton { pos: SourcePos, of_type: TypeId },
    WriteLocal { pos: SourcePos, local_index: usize, value: Box<Cmd> },
    WriteGlobal { pos: SourcePos, owner: TypeId, name: Symbol, value: Box<Cmd> },
    WriteProperty {
        pos: SourcePos,
        context: Box<Cmd>,
        owner: TypeId,
        name: Symbol,
        value: Box<Cmd>,
    },
    WriteArrayElement { pos: SourcePos, array: Box<Cmd>, index: Box<Cmd>, value: Box<Cmd> },
    /// Unresolved `target = value`.
    Assign { pos: SourcePos, target: Box<Cmd>, value: Box<Cmd> },
    /// Unresolved `target op= value`; `op` is the base operator token.
    OpWithAssign {
        pos: SourcePos,
        target: Box<Cmd>,
        op: crate::token::TokenKind,
        value: Box<Cmd>,
    },
    LocalOpWithAssign {
        pos: SourcePos,
        local_index: usize,
        op: crate::token::TokenKind,
        value: Box<Cmd>,
    },
    OpAssignGlobal {
        pos: SourcePos,
        owner: TypeId,
        name: Symbol,
        op: crate::token::TokenKind,
        value: Box<Cmd>,
    },
    OpAssignProperty {
        pos: SourcePos,
        context: Box<Cmd>,
        owner: TypeId,
        name: Symbol,
        op: crate::token::TokenKind,
        value: Box<Cmd>,
    },
    /// Unresolved `target++` / `target--`; `delta` is +1 or -1.
    Adjust { pos: SourcePos, target: Box<Cmd>, delta: i32 },
    AdjustLocal { pos: SourcePos, local_index: usize, delta: i32 },
    AdjustProperty {
        pos: SourcePos,
        context: Box<Cmd>,
        owner: TypeId,
        name: Symbol,
        delta: i32,
    },

    // =====================================================================
    // Unary and binary operators
    // =====================================================================
    Add { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    Subtract { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    Multiply { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    Divide { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    Mod { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    Power { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    BitwiseXor { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    BitwiseOr { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    BitwiseAnd { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    ShiftLeft { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    ShiftRight { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    ShiftRightX { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    BitwiseNot { pos: SourcePos, operand: Box<Cmd> },
    Negate { pos: SourcePos, operand: Box<Cmd> },
    /// Coerces to Logical (`!!x` in C terms).
    Logicalize { pos: SourcePos, operand: Box<Cmd> },
    LogicalNot { pos: SourcePos, operand: Box<Cmd> },
    LogicalOr { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    LogicalAnd { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    LogicalXor { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareEq { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareNe { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareLt { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareLe { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareGt { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareGe { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    /// Identity comparison; never calls user operators.
    CompareIs { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    CompareIsNot { pos: SourcePos, lhs: Box<Cmd>, rhs: Box<Cmd> },
    InstanceOf { pos: SourcePos, operand: Box<Cmd>, of_type_name: Symbol, of_type: Option<TypeId> },
    NotInstanceOf {
        pos: SourcePos,
        operand: Box<Cmd>,
        of_type_name: Symbol,
        of_type: Option<TypeId>,
    },
    /// Runtime-checked downcast; faults on mismatch.
    CastToType { pos: SourcePos, operand: Box<Cmd>, of_type: TypeId },
    /// Checked cast that yields null on mismatch.
    As { pos: SourcePos, operand: Box<Cmd>, of_type_name: Symbol, of_type: Option<TypeId> },
    /// Conversion found through a user `toType` method or constructor.
    ConvertToType { pos: SourcePos, operand: Box<Cmd>, of_type: TypeId },
    /// Numeric conversion between primitive types.
    ConvertToPrimitiveType { pos: SourcePos, operand: Box<Cmd>, of_type: TypeId },
    Range { pos: SourcePos, low: Box<Cmd>, high: Box<Cmd> },
    RangeUpTo { pos: SourcePos, low: Box<Cmd>, high: Box<Cmd> },
    RangeDownTo { pos: SourcePos, low: Box<Cmd>, high: Box<Cmd> },

    // =====================================================================
    // Control flow
    // =====================================================================
    If {
        pos: SourcePos,
        condition: Box<Cmd>,
        then_statements: Vec<Cmd>,
        else_statements: Vec<Cmd>,
    },
    Which { pos: SourcePos, subject: Box<Cmd>, cases: Vec<WhichCase>, others: Vec<Cmd> },
    Switch { pos: SourcePos, subject: Box<Cmd>, cases: Vec<SwitchCase>, others: Vec<Cmd> },
    Contingent {
        pos: SourcePos,
        statements: Vec<Cmd>,
        satisfied: Vec<Cmd>,
        unsatisfied: Vec<Cmd>,
        control_id: usize,
    },
    Try { pos: SourcePos, statements: Vec<Cmd>, catches: Vec<CatchClause> },
    Throw { pos: SourcePos, value: Box<Cmd> },
    /// `loop` and `while`; `condition` is `None` for a bare `loop`. The
    /// optional `increment` runs between iterations, after any
    /// `nextIteration` jump target (desugared `forEach` uses it).
    GenericLoop {
        pos: SourcePos,
        condition: Option<Box<Cmd>>,
        increment: Option<Box<Cmd>>,
        statements: Vec<Cmd>,
        control_id: usize,
    },
    /// `forEach name in collection`; desugared into locals plus a
    /// [`Cmd::GenericLoop`] during resolution.
    ForEach {
        pos: SourcePos,
        counter_name: Symbol,
        collection: Box<Cmd>,
        statements: Vec<Cmd>,
        control_id: usize,
    },
    Block { pos: SourcePos, statements: Vec<Cmd> },
    /// Unresolved `local name [: Type] [= value]`; resolution pushes the
    /// local onto the scope and rewrites to [`Cmd::LocalDeclaration`].
    DeclareLocal {
        pos: SourcePos,
        name: Symbol,
        declared_type: Option<Symbol>,
        initial: Option<Box<Cmd>>,
    },
    LocalDeclaration { pos: SourcePos, local_index: usize, initial: Option<Box<Cmd>> },
    Return { pos: SourcePos, value: Option<Box<Cmd>> },
    Escape { pos: SourcePos, control_id: usize },
    NextIteration { pos: SourcePos, control_id: usize },
    /// Inside `contingent`: failing the condition jumps to `unsatisfied`.
    Necessary { pos: SourcePos, condition: Box<Cmd>, control_id: usize },
    /// Inside `contingent`: passing the condition jumps to `satisfied`.
    Sufficient { pos: SourcePos, condition: Box<Cmd>, control_id: usize },
    /// Debug print of source text plus optional value.
    Trace { pos: SourcePos, text: String, value: Option<Box<Cmd>> },
    Label { pos: SourcePos, name: Symbol },
    Await { pos: SourcePos, value: Box<Cmd> },
    Yield { pos: SourcePos, value: Option<Box<Cmd>> },
    /// Whole lowered task body: an `ip`-dispatched list of sections.
    TaskControl { pos: SourcePos, sections: Vec<Cmd> },
    /// One resumable section of a lowered task.
    TaskControlSection { pos: SourcePos, ip: usize, statements: Vec<Cmd> },

    // =====================================================================
    // Calls
    // =====================================================================
    CallRoutine { pos: SourcePos, owner: TypeId, method: MethodId, args: Vec<Cmd> },
    CallStaticMethod { pos: SourcePos, context: Box<Cmd>, method: MethodId, args: Vec<Cmd> },
    CallDynamicMethod { pos: SourcePos, context: Box<Cmd>, method: MethodId, args: Vec<Cmd> },
    CallAspectMethod { pos: SourcePos, context: Box<Cmd>, method: MethodId, args: Vec<Cmd> },
    CallNativeRoutine { pos: SourcePos, owner: TypeId, method: MethodId, args: Vec<Cmd> },
    CallInlineNativeRoutine { pos: SourcePos, owner: TypeId, method: MethodId, args: Vec<Cmd> },
    CallNativeMethod { pos: SourcePos, context: Box<Cmd>, method: MethodId, args: Vec<Cmd> },
    CallInlineNativeMethod { pos: SourcePos, context: Box<Cmd>, method: MethodId, args: Vec<Cmd> },
    /// `prior.name(args)`: the overridden implementation, statically bound.
    CallPriorMethod { pos: SourcePos, method: MethodId, args: Vec<Cmd> },
    /// Transient carrier while a macro body is being inlined: maps the
    /// macro's parameters onto the call-site argument expressions.
    MacroArgs { pos: SourcePos, context: Option<Box<Cmd>>, args: Vec<Cmd> },

    // =====================================================================
    // Native splice
    // =====================================================================
    /// Verbatim target-language text; `$this`, `$paramN`, `$property` and
    /// `$TypeName` markers are substituted at emission.
    NativeCode { pos: SourcePos, code: String },
}

impl Cmd {
    /// Source position of the token this node was built from.
    pub fn pos(&self) -> SourcePos {
        use Cmd::*;
        match self {
            LiteralInteger { pos, .. }
            | LiteralLong { pos, .. }
            | LiteralReal { pos, .. }
            | LiteralCharacter { pos, .. }
            | LiteralLogical { pos, .. }
            | LiteralString { pos, .. }
            | LiteralNull { pos }
            | This { pos, .. }
            | Prior { pos }
            | DefaultValue { pos, .. }
            | CreateCompound { pos, .. }
            | CreateCompoundLiteral { pos, .. }
            | CreateList { pos, .. }
            | CreateArray { pos, .. }
            | CreateOptionalValue { pos, .. }
            | CreateObject { pos, .. }
            | CreateCallback { pos, .. }
            | CreateFunction { pos, .. }
            | FormattedString { pos, .. }
            | Access { pos, .. }
            | ElementAccess { pos, .. }
            | ReadLocal { pos, .. }
            | ReadGlobal { pos, .. }
            | ReadProperty { pos, .. }
            | ReadArrayElement { pos, .. }
            | ReadArrayCount { pos, .. }
            | ReadSingleton { pos, .. }
            | WriteLocal { pos, .. }
            | WriteGlobal { pos, .. }
            | WriteProperty { pos, .. }
            | WriteArrayElement { pos, .. }
            | Assign { pos, .. }
            | OpWithAssign { pos, .. }
            | LocalOpWithAssign { pos, .. }
            | OpAssignGlobal { pos, .. }
            | OpAssignProperty { pos, .. }
            | Adjust { pos, .. }
            | AdjustLocal { pos, .. }
            | AdjustProperty { pos, .. }
            | Add { pos, .. }
            | Subtract { pos, .. }
            | Multiply { pos, .. }
            | Divide { pos, .. }
            | Mod { pos, .. }
            | Power { pos, .. }
            | BitwiseXor { pos, .. }
            | BitwiseOr { pos, .. }
            | BitwiseAnd { pos, .. }
            | ShiftLeft { pos, .. }
            | ShiftRight { pos, .. }
            | ShiftRightX { pos, .. }
            | BitwiseNot { pos, .. }
            | Negate { pos, .. }
            | Logicalize { pos, .. }
            | LogicalNot { pos, .. }
            | LogicalOr { pos, .. }
            | LogicalAnd { pos, .. }
            | LogicalXor { pos, .. }
            | CompareEq { pos, .. }
            | CompareNe { pos, .. }
            | CompareLt { pos, .. }
            | CompareLe { pos, .. }
            | CompareGt { pos, .. }
            | CompareGe { pos, .. }
            | CompareIs { pos, .. }
            | CompareIsNot { pos, .. }
            | InstanceOf { pos, .. }
            | NotInstanceOf { pos, .. }
            | CastToType { pos, .. }
            | As { pos, .. }
            | ConvertToType { pos, .. }
            | ConvertToPrimitiveType { pos, .. }
            | Range { pos, .. }
            | RangeUpTo { pos, .. }
            | RangeDownTo { pos, .. }
            | If { pos, .. }
            | Which { pos, .. }
            | Switch { pos, .. }
            | Contingent { pos, .. }
            | Try { pos, .. }
            | Throw { pos, .. }
            | GenericLoop { pos, .. }
            | ForEach { pos, .. }
            | Block { pos, .. }
            | DeclareLocal { pos, .. }
            | LocalDeclaration { pos, .. }
            | Return { pos, .. }
            | Escape { pos, .. }
            | NextIteration { pos, .. }
            | Necessary { pos, .. }
            | Sufficient { pos, .. }
            | Trace { pos, .. }
            | Label { pos, .. }
            | Await { pos, .. }
            | Yield { pos, .. }
            | TaskControl { pos, .. }
            | TaskControlSection { pos, .. }
            | CallRoutine { pos, .. }
            | CallStaticMethod { pos, .. }
            | CallDynamicMethod { pos, .. }
            | CallAspectMethod { pos, .. }
            | CallNativeRoutine { pos, .. }
            | CallInlineNativeRoutine { pos, .. }
            | CallNativeMethod { pos, .. }
            | CallInlineNativeMethod { pos, .. }
            | CallPriorMethod { pos, .. }
            | MacroArgs { pos, .. }
            | NativeCode { pos, .. } => *pos,
        }
    }

    /// True for nodes whose value is a compile-time constant.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Cmd::LiteralInteger { .. }
                | Cmd::LiteralLong { .. }
                | Cmd::LiteralReal { .. }
                | Cmd::LiteralCharacter { .. }
                | Cmd::LiteralLogical { .. }
                | Cmd::LiteralString { .. }
                | Cmd::LiteralNull { .. }
        )
    }

    /// Whether the C emitter must end this statement with `;`.
    ///
    /// Structured statements close themselves with braces.
    pub fn requires_semicolon(&self) -> bool {
        !matches!(
            self,
            Cmd::If { .. }
                | Cmd::Which { .. }
                | Cmd::Switch { .. }
                | Cmd::Contingent { .. }
                | Cmd::Try { .. }
                | Cmd::GenericLoop { .. }
                | Cmd::ForEach { .. }
                | Cmd::Block { .. }
                | Cmd::TaskControl { .. }
                | Cmd::TaskControlSection { .. }
                | Cmd::Label { .. }
                | Cmd::NativeCode { .. }
        )
    }

    /// True once resolution has replaced every unresolved shape below this
    /// node. Used by the fixed-point driver to decide convergence.
    pub fn is_resolved_shape(&self) -> bool {
        !matches!(
            self,
            Cmd::Access { .. }
                | Cmd::ElementAccess { .. }
                | Cmd::Assign { .. }
                | Cmd::OpWithAssign { .. }
                | Cmd::Adjust { .. }
                | Cmd::DeclareLocal { .. }
                | Cmd::CreateCompoundLiteral { .. }
                | Cmd::MacroArgs { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos::default()
    }

    #[test]
    fn literals_are_literal() {
        assert!(Cmd::LiteralInteger { pos: pos(), value: 1 }.is_literal());
        assert!(Cmd::LiteralNull { pos: pos() }.is_literal());
        assert!(!Cmd::Block { pos: pos(), statements: vec![] }.is_literal());
    }

    #[test]
    fn structured_statements_skip_semicolon() {
        let cmd = Cmd::If {
            pos: pos(),
            condition: Box::new(Cmd::LiteralLogical { pos: pos(), value: true }),
            then_statements: vec![],
            else_statements: vec![],
        };
        assert!(!cmd.requires_semicolon());
        let ret = Cmd::Return { pos: pos(), value: None };
        assert!(ret.requires_semicolon());
    }

    #[test]
    fn pos_is_preserved() {
        let mut interner = crate::intern::Interner::new();
        let file = interner.intern("x.argon");
        let p = SourcePos::new(file, 3, 9);
        let cmd = Cmd::Escape { pos: p, control_id: 0 };
        assert_eq!(cmd.pos(), p);
    }

    #[test]
    fn unresolved_shapes_report_unresolved() {
        let access = Cmd::Access {
            pos: pos(),
            context: None,
            name: Symbol::EMPTY,
            args: None,
        };
        assert!(!access.is_resolved_shape());
        assert!(Cmd::ReadLocal { pos: pos(), local_index: 0 }.is_resolved_shape());
    }
}
