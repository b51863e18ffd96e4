//! String, symbol, big-integer, and descriptor interning.
//!
//! The interners store unique strings, symbol records, `BigInt` literals, and
//! compiled descriptors in vectors and hand out small index ids (`StringId`,
//! `SymbolId`, `BigIntId`, `FunctionId`). Bytecode operands reference these
//! ids directly, so the interns table *is* the constant pool of a compiled
//! program.
//!
//! StringIds are laid out as follows:
//! * 0 to 127 - single character strings for all 128 ASCII characters
//! * 1000 to 1000+count(StaticStrings) - pre-interned well-known names
//! * 10_000+ - strings interned per program

use std::sync::LazyLock;

use ahash::AHashMap;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumString, FromRepr, IntoStaticStr};

use std::sync::Arc;

use crate::bytecode::Code;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space. Property maps, scope bindings, and bytecode
/// operands all carry these instead of owned strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct StringId(u32);

/// StringId offsets.
const STATIC_STRING_ID_OFFSET: u32 = 1000;
const INTERN_STRING_ID_OFFSET: u32 = 10_000;

impl StringId {
    /// Reconstructs a StringId from a raw bytecode operand. The caller is
    /// responsible for ensuring the index is valid for the program's interns.
    #[inline]
    #[must_use]
    pub fn from_operand(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value encoded into bytecode operands.
    #[inline]
    #[must_use]
    pub fn operand(self) -> u32 {
        self.0
    }

    /// Returns the StringId for a single ASCII character.
    #[must_use]
    pub fn from_ascii(byte: u8) -> Self {
        debug_assert!(byte < 128);
        Self(u32::from(byte))
    }
}

impl From<StaticStrings> for StringId {
    fn from(s: StaticStrings) -> Self {
        Self(STATIC_STRING_ID_OFFSET + s as u32)
    }
}

/// Static strings for all 128 ASCII characters, built once on first access.
static ASCII_STRS: LazyLock<[&'static str; 128]> = LazyLock::new(|| {
    std::array::from_fn(|i| {
        let s = char::from(u8::try_from(i).expect("index out of u8 range")).to_string();
        // Leak to get 'static lifetime - intentional and bounded (128 bytes total)
        &*Box::leak(s.into_boxed_str())
    })
});

/// Names known at compile time that never need dynamic interning.
///
/// Grouped by the part of the runtime that consumes them. The serialized
/// form is the script-visible spelling.
#[repr(u16)]
#[derive(
    Debug, Clone, Copy, FromRepr, EnumString, EnumCount, IntoStaticStr, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[strum(serialize_all = "camelCase")]
pub enum StaticStrings {
    #[strum(serialize = "")]
    EmptyString,
    #[strum(serialize = "<top-level>")]
    TopLevel,
    #[strum(serialize = "<anonymous>")]
    Anonymous,

    // ==========================
    // typeof results and literal spellings
    Undefined,
    Null,
    Boolean,
    Number,
    Bigint,
    String,
    Symbol,
    Function,
    Object,
    True,
    False,
    #[strum(serialize = "NaN")]
    NaN,
    #[strum(serialize = "Infinity")]
    Infinity,

    // ==========================
    // Property-protocol names
    Length,
    Name,
    Prototype,
    Constructor,
    Message,
    Stack,
    Value,
    Done,
    Next,
    Return,
    Throw,
    Get,
    Set,
    Writable,
    Enumerable,
    Configurable,
    Arguments,
    Callee,

    // ==========================
    // Object / Function / Array intrinsics
    #[strum(serialize = "toString")]
    ToString,
    #[strum(serialize = "valueOf")]
    ValueOf,
    #[strum(serialize = "hasOwnProperty")]
    HasOwnProperty,
    Call,
    Apply,
    Bind,
    /// Prefix for bound-function names, trailing space included.
    #[strum(serialize = "bound ")]
    BoundPrefix,
    From,
    Push,
    Join,
    #[strum(serialize = "indexOf")]
    IndexOf,
    Freeze,
    Seal,
    #[strum(serialize = "preventExtensions")]
    PreventExtensions,
    #[strum(serialize = "isFrozen")]
    IsFrozen,
    #[strum(serialize = "isSealed")]
    IsSealed,
    #[strum(serialize = "isExtensible")]
    IsExtensible,
    #[strum(serialize = "getPrototypeOf")]
    GetPrototypeOf,
    #[strum(serialize = "setPrototypeOf")]
    SetPrototypeOf,
    #[strum(serialize = "defineProperty")]
    DefineProperty,
    #[strum(serialize = "getOwnPropertyNames")]
    GetOwnPropertyNames,
    Keys,
    For,
    #[strum(serialize = "keyFor")]
    KeyFor,
    Description,

    // ==========================
    // Promise protocol
    Then,
    Catch,
    Finally,
    Resolve,
    Reject,

    // ==========================
    // Well-known symbol descriptions
    #[strum(serialize = "Symbol.iterator")]
    SymbolIterator,
    #[strum(serialize = "Symbol.asyncIterator")]
    SymbolAsyncIterator,
    #[strum(serialize = "Symbol.toPrimitive")]
    SymbolToPrimitive,
    #[strum(serialize = "Symbol.hasInstance")]
    SymbolHasInstance,
    #[strum(serialize = "Symbol.toStringTag")]
    SymbolToStringTag,

    // ==========================
    // ToPrimitive hints
    Default,

    // ==========================
    // Globals and constructors
    #[strum(serialize = "globalThis")]
    GlobalThis,
    #[strum(serialize = "Object")]
    ObjectCtor,
    #[strum(serialize = "Function")]
    FunctionCtor,
    #[strum(serialize = "Array")]
    ArrayCtor,
    #[strum(serialize = "Symbol")]
    SymbolCtor,
    #[strum(serialize = "Promise")]
    PromiseCtor,
    #[strum(serialize = "RegExp")]
    RegExpCtor,
    #[strum(serialize = "BigInt")]
    BigIntCtor,
    #[strum(serialize = "Error")]
    ErrorCtor,
    #[strum(serialize = "TypeError")]
    TypeErrorCtor,
    #[strum(serialize = "RangeError")]
    RangeErrorCtor,
    #[strum(serialize = "ReferenceError")]
    ReferenceErrorCtor,
    #[strum(serialize = "SyntaxError")]
    SyntaxErrorCtor,
    #[strum(serialize = "InternalError")]
    InternalErrorCtor,
    #[strum(serialize = "URIError")]
    UriErrorCtor,
    #[strum(serialize = "EvalError")]
    EvalErrorCtor,
    #[strum(serialize = "AggregateError")]
    AggregateErrorCtor,
    Eval,

    // ==========================
    // RegExp protocol
    #[strum(serialize = "lastIndex")]
    LastIndex,
    Source,
    Flags,
    Exec,
    Index,
    Input,
}

/// Index of a symbol record.
///
/// Symbols are identity values; two symbols are the same value iff their ids
/// are equal. The five well-known symbols occupy the first slots of every
/// interns table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(u32);

impl SymbolId {
    #[inline]
    #[must_use]
    pub fn from_operand(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn operand(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The well-known symbols pre-registered in every interns table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WellKnownSymbol {
    Iterator = 0,
    AsyncIterator = 1,
    ToPrimitive = 2,
    HasInstance = 3,
    ToStringTag = 4,
}

impl WellKnownSymbol {
    const COUNT: u32 = 5;

    #[must_use]
    pub fn id(self) -> SymbolId {
        SymbolId(self as u32)
    }

    fn description(self) -> StaticStrings {
        match self {
            Self::Iterator => StaticStrings::SymbolIterator,
            Self::AsyncIterator => StaticStrings::SymbolAsyncIterator,
            Self::ToPrimitive => StaticStrings::SymbolToPrimitive,
            Self::HasInstance => StaticStrings::SymbolHasInstance,
            Self::ToStringTag => StaticStrings::SymbolToStringTag,
        }
    }
}

/// Identity record for one symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Optional description shown by `toString` (`Symbol(desc)`).
    pub description: Option<StringId>,
    /// Key under which the symbol is registered (`Symbol.for`), if any.
    pub registry_key: Option<StringId>,
}

/// Index of an interned `BigInt` literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BigIntId(u32);

impl BigIntId {
    #[inline]
    #[must_use]
    pub fn from_operand(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn operand(self) -> u32 {
        self.0
    }
}

/// Index of a compiled descriptor in the program's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(u32);

impl FunctionId {
    #[inline]
    #[must_use]
    pub fn from_operand(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn operand(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned strings, symbols, `BigInt` literals, and compiled descriptors.
///
/// One `Interns` value is the constant-pool side of a compiled program: the
/// compiler populates it, the runtime reads it, and runtime code may keep
/// interning new property-name strings while executing. Serializing the
/// table (postcard) round-trips a compiled program exactly.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Interns {
    /// Dynamically interned strings, indexed from `INTERN_STRING_ID_OFFSET`.
    strings: Vec<String>,
    /// Content lookup for dynamic strings. Rebuilt after deserialization.
    #[serde(skip)]
    lookup: hashbrown::HashMap<String, u32, ahash::RandomState>,
    /// Interned `BigInt` literals.
    bigints: Vec<BigInt>,
    /// Compiled descriptors, indexed by `FunctionId`. Shared so call
    /// frames can hold the code they execute without borrowing the table.
    functions: Vec<Arc<Code>>,
    /// Symbol identity records, indexed by `SymbolId`.
    symbols: Vec<SymbolRecord>,
    /// `Symbol.for` registry: key string -> symbol.
    symbol_registry: AHashMap<StringId, SymbolId>,
}

impl Interns {
    /// Creates an interns table with the well-known symbols registered.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Self::default();
        for i in 0..WellKnownSymbol::COUNT {
            let wk = match i {
                0 => WellKnownSymbol::Iterator,
                1 => WellKnownSymbol::AsyncIterator,
                2 => WellKnownSymbol::ToPrimitive,
                3 => WellKnownSymbol::HasInstance,
                _ => WellKnownSymbol::ToStringTag,
            };
            interns.symbols.push(SymbolRecord {
                description: Some(wk.description().into()),
                registry_key: None,
            });
        }
        interns
    }

    /// Interns a string, returning its id.
    ///
    /// Single ASCII characters and well-known names resolve to their static
    /// ids without touching the dynamic table.
    pub fn intern(&mut self, s: &str) -> StringId {
        if s.len() == 1 {
            let byte = s.as_bytes()[0];
            if byte < 128 {
                return StringId::from_ascii(byte);
            }
        }
        if let Ok(stat) = s.parse::<StaticStrings>() {
            return stat.into();
        }
        if let Some(&idx) = self.lookup.get(s) {
            return StringId(INTERN_STRING_ID_OFFSET + idx);
        }
        let idx = u32::try_from(self.strings.len()).expect("intern table overflow");
        self.strings.push(s.to_owned());
        self.lookup.insert(s.to_owned(), idx);
        StringId(INTERN_STRING_ID_OFFSET + idx)
    }

    /// Returns the text of an interned string.
    ///
    /// # Panics
    /// Panics if the id does not belong to this table.
    #[must_use]
    pub fn get_str(&self, id: StringId) -> &str {
        if id.0 < 128 {
            ASCII_STRS[id.0 as usize]
        } else if id.0 >= INTERN_STRING_ID_OFFSET {
            &self.strings[(id.0 - INTERN_STRING_ID_OFFSET) as usize]
        } else {
            let stat = StaticStrings::from_repr(
                u16::try_from(id.0 - STATIC_STRING_ID_OFFSET).expect("invalid static string id"),
            )
            .expect("invalid static string id");
            stat.into()
        }
    }

    /// Number of dynamically interned strings (excludes ASCII and statics).
    #[must_use]
    pub fn interned_strings(&self) -> usize {
        self.strings.len()
    }

    /// Rebuilds the content-lookup index after deserialization.
    pub fn rebuild_lookup(&mut self) {
        self.lookup = self
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), u32::try_from(i).expect("intern table overflow")))
            .collect();
    }

    /// Interns a `BigInt` literal for bytecode reference.
    pub fn add_bigint(&mut self, value: BigInt) -> BigIntId {
        if let Some(pos) = self.bigints.iter().position(|b| *b == value) {
            return BigIntId(u32::try_from(pos).expect("bigint pool overflow"));
        }
        let id = BigIntId(u32::try_from(self.bigints.len()).expect("bigint pool overflow"));
        self.bigints.push(value);
        id
    }

    /// Returns an interned `BigInt` literal.
    #[must_use]
    pub fn get_bigint(&self, id: BigIntId) -> &BigInt {
        &self.bigints[id.0 as usize]
    }

    /// Registers a compiled descriptor, returning its id.
    pub fn add_function(&mut self, code: Code) -> FunctionId {
        let id = FunctionId(u32::try_from(self.functions.len()).expect("function table overflow"));
        self.functions.push(Arc::new(code));
        id
    }

    /// Returns a compiled descriptor.
    ///
    /// # Panics
    /// Panics if the id does not belong to this table.
    #[must_use]
    pub fn code(&self, id: FunctionId) -> &Arc<Code> {
        &self.functions[id.index()]
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Creates a fresh symbol with an optional description.
    pub fn new_symbol(&mut self, description: Option<StringId>) -> SymbolId {
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol table overflow"));
        self.symbols.push(SymbolRecord {
            description,
            registry_key: None,
        });
        id
    }

    /// Returns the registered symbol for `key`, creating it on first use.
    pub fn symbol_for(&mut self, key: StringId) -> SymbolId {
        if let Some(&id) = self.symbol_registry.get(&key) {
            return id;
        }
        let id = SymbolId(u32::try_from(self.symbols.len()).expect("symbol table overflow"));
        self.symbols.push(SymbolRecord {
            description: Some(key),
            registry_key: Some(key),
        });
        self.symbol_registry.insert(key, id);
        id
    }

    /// Returns the symbol's identity record.
    #[must_use]
    pub fn symbol(&self, id: SymbolId) -> &SymbolRecord {
        &self.symbols[id.index()]
    }

    /// Renders a symbol the way `String(sym)` would: `Symbol(desc)`.
    #[must_use]
    pub fn symbol_to_string(&self, id: SymbolId) -> String {
        match self.symbols[id.index()].description {
            Some(desc) => format!("Symbol({})", self.get_str(desc)),
            None => "Symbol()".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_and_static_strings_bypass_dynamic_table() {
        let mut interns = Interns::new();
        let a = interns.intern("a");
        assert_eq!(a, StringId::from_ascii(b'a'));
        assert_eq!(interns.get_str(a), "a");

        let length = interns.intern("length");
        assert_eq!(length, StringId::from(StaticStrings::Length));
        assert_eq!(interns.get_str(length), "length");
        assert_eq!(interns.interned_strings(), 0);
    }

    #[test]
    fn dynamic_interning_is_idempotent() {
        let mut interns = Interns::new();
        let first = interns.intern("someLongPropertyName");
        let second = interns.intern("someLongPropertyName");
        assert_eq!(first, second);
        assert_eq!(interns.get_str(first), "someLongPropertyName");
        assert_eq!(interns.interned_strings(), 1);
    }

    #[test]
    fn well_known_symbols_are_pre_registered() {
        let interns = Interns::new();
        let iter = WellKnownSymbol::Iterator.id();
        let desc = interns.symbol(iter).description.unwrap();
        assert_eq!(interns.get_str(desc), "Symbol.iterator");
        assert_eq!(interns.symbol_to_string(iter), "Symbol(Symbol.iterator)");
    }

    #[test]
    fn symbol_registry_deduplicates_by_key() {
        let mut interns = Interns::new();
        let key = interns.intern("app.token");
        let s1 = interns.symbol_for(key);
        let s2 = interns.symbol_for(key);
        assert_eq!(s1, s2);
        assert_eq!(interns.symbol(s1).registry_key, Some(key));
    }

    #[test]
    fn bigint_pool_deduplicates() {
        let mut interns = Interns::new();
        let a = interns.add_bigint(BigInt::from(42));
        let b = interns.add_bigint(BigInt::from(42));
        assert_eq!(a, b);
        assert_eq!(*interns.get_bigint(a), BigInt::from(42));
    }
}
