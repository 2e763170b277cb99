//! Native opcode tables. Readers translate these into [`crate::instruction::Op`].

use crate::chunk::LuaJitVersion;

/// Lua 5.1 opcodes.
///
/// Format: op(6) A(8) C(9) B(9), or op(6) A(8) Bx(18). RK operands with the
/// high bit (256) set name a constant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lua51Op {
    /// MOVE: A = B
    Move,
    /// LOADK: A = K[Bx]
    LoadK,
    /// LOADBOOL: A = (bool)B; if C, pc++
    LoadBool,
    /// LOADNIL: A..B = nil
    LoadNil,
    /// GETUPVAL: A = U[B]
    GetUpval,
    /// GETGLOBAL: A = G[K[Bx]]
    GetGlobal,
    /// GETTABLE: A = B[RK(C)]
    GetTable,
    /// SETGLOBAL: G[K[Bx]] = A
    SetGlobal,
    /// SETUPVAL: U[B] = A
    SetUpval,
    /// SETTABLE: A[RK(B)] = RK(C)
    SetTable,
    /// NEWTABLE: A = {} (B array, C hash size hints)
    NewTable,
    /// SELF: A+1 = B; A = B[RK(C)]
    SelfOp,
    /// ADD: A = RK(B) + RK(C)
    Add,
    /// SUB: A = RK(B) - RK(C)
    Sub,
    /// MUL: A = RK(B) * RK(C)
    Mul,
    /// DIV: A = RK(B) / RK(C)
    Div,
    /// MOD: A = RK(B) % RK(C)
    Mod,
    /// POW: A = RK(B) ^ RK(C)
    Pow,
    /// UNM: A = -B
    Unm,
    /// NOT: A = not B
    Not,
    /// LEN: A = #B
    Len,
    /// CONCAT: A = B .. ... .. C
    Concat,
    /// JMP: pc += sBx
    Jmp,
    /// EQ: if (RK(B) == RK(C)) ~= A then pc++
    Eq,
    /// LT: if (RK(B) < RK(C)) ~= A then pc++
    Lt,
    /// LE: if (RK(B) <= RK(C)) ~= A then pc++
    Le,
    /// TEST: if not (A <=> C) then pc++
    Test,
    /// TESTSET: if (B <=> C) then A = B else pc++
    TestSet,
    /// CALL: A..A+C-2 = A(A+1..A+B-1)
    Call,
    /// TAILCALL: return A(A+1..A+B-1)
    TailCall,
    /// RETURN: return A..A+B-2
    Return,
    /// FORLOOP: A += A+2; if A <?= A+1 then { pc += sBx; A+3 = A }
    ForLoop,
    /// FORPREP: A -= A+2; pc += sBx
    ForPrep,
    /// TFORLOOP: A+3..A+2+C = A(A+1, A+2); if A+3 ~= nil then A+2 = A+3 else pc++
    TForLoop,
    /// SETLIST: A[(C-1)*FPF+i] = A+i, 1 <= i <= B
    SetList,
    /// CLOSE: close upvalues >= A
    Close,
    /// CLOSURE: A = closure(KPROTO[Bx]); followed by one capture op per upvalue
    Closure,
    /// VARARG: A..A+B-2 = ...
    VarArg,
}

const LUA51_TABLE: [Lua51Op; 38] = {
    use Lua51Op::*;
    [
        Move, LoadK, LoadBool, LoadNil, GetUpval, GetGlobal, GetTable, SetGlobal, SetUpval,
        SetTable, NewTable, SelfOp, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len, Concat, Jmp,
        Eq, Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep, TForLoop,
        SetList, Close, Closure, VarArg,
    ]
};

impl Lua51Op {
    pub fn from_byte(byte: u8) -> Option<Self> {
        LUA51_TABLE.get(byte as usize).copied()
    }
}

/// LuaJIT opcodes, numbered as in LuaJIT 2.1.
///
/// Format: op(8) A(8) C(8) B(8), or op(8) A(8) D(16). Jump offsets in D are
/// biased by 0x8000. String/table/cdata/function operands index the GC
/// constant list from its end; number operands index the numeric list.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaJitOp {
    /// ISLT: if A < D then jump
    IsLt,
    /// ISGE: if not (A < D) then jump
    IsGe,
    /// ISLE: if A <= D then jump
    IsLe,
    /// ISGT: if not (A <= D) then jump
    IsGt,
    /// ISEQV: if A == D then jump
    IsEqV,
    /// ISNEV: if A ~= D then jump
    IsNeV,
    /// ISEQS: if A == str(D) then jump
    IsEqS,
    /// ISNES: if A ~= str(D) then jump
    IsNeS,
    /// ISEQN: if A == num(D) then jump
    IsEqN,
    /// ISNEN: if A ~= num(D) then jump
    IsNeN,
    /// ISEQP: if A == pri(D) then jump
    IsEqP,
    /// ISNEP: if A ~= pri(D) then jump
    IsNeP,
    /// ISTC: if D then A = D; jump
    IsTc,
    /// ISFC: if not D then A = D; jump
    IsFc,
    /// IST: if D then jump
    IsT,
    /// ISF: if not D then jump
    IsF,
    /// ISTYPE: type check hint (2.1 only)
    IsType,
    /// ISNUM: number check hint (2.1 only)
    IsNum,
    /// MOV: A = D
    Mov,
    /// NOT: A = not D
    Not,
    /// UNM: A = -D
    Unm,
    /// LEN: A = #D
    Len,
    /// ADDVN: A = B + num(C)
    AddVN,
    /// SUBVN: A = B - num(C)
    SubVN,
    /// MULVN: A = B * num(C)
    MulVN,
    /// DIVVN: A = B / num(C)
    DivVN,
    /// MODVN: A = B % num(C)
    ModVN,
    /// ADDNV: A = num(C) + B
    AddNV,
    /// SUBNV: A = num(C) - B
    SubNV,
    /// MULNV: A = num(C) * B
    MulNV,
    /// DIVNV: A = num(C) / B
    DivNV,
    /// MODNV: A = num(C) % B
    ModNV,
    /// ADDVV: A = B + C
    AddVV,
    /// SUBVV: A = B - C
    SubVV,
    /// MULVV: A = B * C
    MulVV,
    /// DIVVV: A = B / C
    DivVV,
    /// MODVV: A = B % C
    ModVV,
    /// POW: A = B ^ C
    Pow,
    /// CAT: A = B .. ... .. C
    Cat,
    /// KSTR: A = str(D)
    KStr,
    /// KCDATA: A = cdata(D)
    KCData,
    /// KSHORT: A = (i16)D
    KShort,
    /// KNUM: A = num(D)
    KNum,
    /// KPRI: A = pri(D)
    KPri,
    /// KNIL: A..D = nil
    KNil,
    /// UGET: A = U[D]
    UGet,
    /// USETV: U[A] = D
    USetV,
    /// USETS: U[A] = str(D)
    USetS,
    /// USETN: U[A] = num(D)
    USetN,
    /// USETP: U[A] = pri(D)
    USetP,
    /// UCLO: close upvalues >= A; jump
    UClo,
    /// FNEW: A = closure(func(D))
    FNew,
    /// TNEW: A = {}
    TNew,
    /// TDUP: A = copy(tab(D))
    TDup,
    /// GGET: A = G[str(D)]
    GGet,
    /// GSET: G[str(D)] = A
    GSet,
    /// TGETV: A = B[C]
    TGetV,
    /// TGETS: A = B[str(C)]
    TGetS,
    /// TGETB: A = B[C] (C is an 8-bit literal)
    TGetB,
    /// TGETR: A = B[C] without metamethods (2.1 only)
    TGetR,
    /// TSETV: B[C] = A
    TSetV,
    /// TSETS: B[str(C)] = A
    TSetS,
    /// TSETB: B[C] = A (C is an 8-bit literal)
    TSetB,
    /// TSETM: (A-1)[num(D)..] = MULTRES
    TSetM,
    /// TSETR: B[C] = A without metamethods (2.1 only)
    TSetR,
    /// CALLM: A..A+B-2 = A(A+1.., MULTRES) with C fixed args
    CallM,
    /// CALL: A..A+B-2 = A(A+1..A+C-1)
    Call,
    /// CALLMT: return A(A+1.., MULTRES)
    CallMT,
    /// CALLT: return A(A+1..A+D-1)
    CallT,
    /// ITERC: A, A+1, A+2 = A-3, A-2, A-1; A..A+B-2 = A(A+1, A+2)
    IterC,
    /// ITERN: specialized ITERC for `next`
    IterN,
    /// VARG: A..A+B-2 = ...
    VArg,
    /// ISNEXT: verify `next` iteration; jump
    IsNext,
    /// RETM: return A..A+D-1, MULTRES
    RetM,
    /// RET: return A..A+D-2
    Ret,
    /// RET0: return
    Ret0,
    /// RET1: return A
    Ret1,
    /// FORI: numeric loop init; jumps past the loop if it never runs
    ForI,
    /// JFORI: JIT-compiled FORI
    JForI,
    /// FORL: numeric loop step; jumps back to the body
    ForL,
    /// IFORL: interpreter-only FORL
    IForL,
    /// JFORL: JIT-compiled FORL (D is a trace number)
    JForL,
    /// ITERL: generic loop test; jumps back to the body
    IterL,
    /// IITERL: interpreter-only ITERL
    IIterL,
    /// JITERL: JIT-compiled ITERL
    JIterL,
    /// LOOP: loop header hint
    Loop,
    /// ILOOP: interpreter-only LOOP
    ILoop,
    /// JLOOP: JIT-compiled LOOP
    JLoop,
    /// JMP: jump
    Jmp,
    /// FUNCF: fixed-arg function header
    FuncF,
    /// IFUNCF: interpreter-only FUNCF
    IFuncF,
    /// JFUNCF: JIT-compiled FUNCF
    JFuncF,
    /// FUNCV: vararg function header
    FuncV,
    /// IFUNCV: interpreter-only FUNCV
    IFuncV,
    /// JFUNCV: JIT-compiled FUNCV
    JFuncV,
    /// FUNCC: C function header
    FuncC,
    /// FUNCCW: wrapped C function header
    FuncCW,
}

const LUAJIT_TABLE: [LuaJitOp; 97] = {
    use LuaJitOp::*;
    [
        IsLt, IsGe, IsLe, IsGt, IsEqV, IsNeV, IsEqS, IsNeS, IsEqN, IsNeN, IsEqP, IsNeP, IsTc,
        IsFc, IsT, IsF, IsType, IsNum, Mov, Not, Unm, Len, AddVN, SubVN, MulVN, DivVN, ModVN,
        AddNV, SubNV, MulNV, DivNV, ModNV, AddVV, SubVV, MulVV, DivVV, ModVV, Pow, Cat, KStr,
        KCData, KShort, KNum, KPri, KNil, UGet, USetV, USetS, USetN, USetP, UClo, FNew, TNew,
        TDup, GGet, GSet, TGetV, TGetS, TGetB, TGetR, TSetV, TSetS, TSetB, TSetM, TSetR, CallM,
        Call, CallMT, CallT, IterC, IterN, VArg, IsNext, RetM, Ret, Ret0, Ret1, ForI, JForI,
        ForL, IForL, JForL, IterL, IIterL, JIterL, Loop, ILoop, JLoop, Jmp, FuncF, IFuncF,
        JFuncF, FuncV, IFuncV, JFuncV, FuncC, FuncCW,
    ]
};

impl LuaJitOp {
    /// Decode an opcode byte. LuaJIT 2.0 lacks ISTYPE, ISNUM, TGETR and
    /// TSETR, so its bytes are shifted onto the 2.1 numbering first.
    pub fn from_byte(byte: u8, version: LuaJitVersion) -> Option<Self> {
        let index = match version {
            LuaJitVersion::V2 => byte as usize,
            LuaJitVersion::V1 => {
                let mut b = byte as usize;
                if b >= 16 {
                    b += 2;
                }
                if b >= 59 {
                    b += 1;
                }
                if b >= 64 {
                    b += 1;
                }
                b
            }
        };
        LUAJIT_TABLE.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lua51_table_matches_discriminants() {
        for (i, op) in LUA51_TABLE.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
        assert_eq!(Lua51Op::from_byte(37), Some(Lua51Op::VarArg));
        assert_eq!(Lua51Op::from_byte(38), None);
    }

    #[test]
    fn luajit_table_matches_discriminants() {
        for (i, op) in LUAJIT_TABLE.iter().enumerate() {
            assert_eq!(*op as usize, i);
        }
    }

    #[test]
    fn luajit_v1_numbering_is_shifted() {
        let v1 = LuaJitVersion::V1;
        assert_eq!(LuaJitOp::from_byte(15, v1), Some(LuaJitOp::IsF));
        assert_eq!(LuaJitOp::from_byte(16, v1), Some(LuaJitOp::Mov));
        assert_eq!(LuaJitOp::from_byte(56, v1), Some(LuaJitOp::TGetB));
        assert_eq!(LuaJitOp::from_byte(57, v1), Some(LuaJitOp::TSetV));
        assert_eq!(LuaJitOp::from_byte(60, v1), Some(LuaJitOp::TSetM));
        assert_eq!(LuaJitOp::from_byte(61, v1), Some(LuaJitOp::CallM));
        assert_eq!(LuaJitOp::from_byte(84, v1), Some(LuaJitOp::Jmp));
        assert_eq!(LuaJitOp::from_byte(92, v1), Some(LuaJitOp::FuncCW));
        assert_eq!(LuaJitOp::from_byte(93, v1), None);
        assert_eq!(
            LuaJitOp::from_byte(88, LuaJitVersion::V2),
            Some(LuaJitOp::Jmp)
        );
    }
}
