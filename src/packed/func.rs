//! Packed functions - type-erased callables
//!
//! A `PackedFunc` is a named record holding one body
//! `(argument views, return slot) -> result`. The body can be attached after
//! registration, so a callable can hand out a stable reference before it is
//! ready. Invocation snapshots the body and runs it without holding any lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::arg::{Arg, ArgSlot, FromArg, IntoArgs};
use super::ret::RetValue;
use super::types::{PackedValue, RawTag, TypeCode, TypeTag};
use crate::errors::{PackedError, PackedResult};

/// Body of a packed function
pub type PackedBody = dyn Fn(&Args<'_>, &mut RetValue) -> PackedResult<()> + Send + Sync;

/// Argument views passed to a body
#[derive(Debug, Clone, Default)]
pub struct Args<'a> {
    args: SmallVec<[Arg<'a>; 4]>,
}

impl<'a> Args<'a> {
    pub fn new(args: impl IntoIterator<Item = Arg<'a>>) -> Self {
        Self {
            args: args.into_iter().collect(),
        }
    }

    /// Views over staged native arguments
    pub fn from_slots(slots: &'a [ArgSlot<'_>]) -> Self {
        Self::new(slots.iter().map(ArgSlot::as_arg))
    }

    /// Rebuild views from parallel raw tag and value arrays
    ///
    /// # Safety
    /// Both arrays must hold `len` entries, each value must match its tag,
    /// and every referent must outlive `'a`.
    pub unsafe fn from_raw(len: usize, tags: *const RawTag, values: *const PackedValue) -> Self {
        if len == 0 {
            return Self::default();
        }
        let tags = core::slice::from_raw_parts(tags, len);
        let values = core::slice::from_raw_parts(values, len);
        Self::new(
            tags.iter()
                .zip(values)
                .map(|(&tag, &value)| Arg::from_raw(tag, value)),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg<'a>> {
        self.args.iter()
    }

    /// View at `index`
    pub fn get(&self, index: usize) -> PackedResult<&Arg<'a>> {
        self.args.get(index).ok_or(PackedError::ArgumentOutOfRange {
            index,
            len: self.args.len(),
        })
    }

    /// Extract argument `index` as a native value
    pub fn arg<T: FromArg<'a>>(&self, index: usize) -> PackedResult<T> {
        self.get(index)?.extract()
    }
}

/// Type-erased callable
pub struct PackedFunc {
    name: Option<Arc<str>>,
    body: RwLock<Option<Arc<PackedBody>>>,
}

impl PackedFunc {
    /// Anonymous callable with a body
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&Args<'_>, &mut RetValue) -> PackedResult<()> + Send + Sync + 'static,
    {
        Self {
            name: None,
            body: RwLock::new(Some(Arc::new(body))),
        }
    }

    /// Named callable without a body yet
    pub fn with_name(name: &str) -> Self {
        Self {
            name: Some(Arc::from(name)),
            body: RwLock::new(None),
        }
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Attach or replace the body
    pub fn set_body<F>(&self, body: F) -> &Self
    where
        F: Fn(&Args<'_>, &mut RetValue) -> PackedResult<()> + Send + Sync + 'static,
    {
        *self.body.write() = Some(Arc::new(body));
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.read().is_some()
    }

    fn snapshot(&self) -> PackedResult<Arc<PackedBody>> {
        self.body.read().clone().ok_or_else(|| PackedError::MissingBody {
            name: self.name().unwrap_or("<anonymous>").to_string(),
        })
    }

    /// Invoke with already-built argument views
    pub fn call_packed(&self, args: &Args<'_>, ret: &mut RetValue) -> PackedResult<()> {
        let body = self.snapshot()?;
        body(args, ret)
    }

    /// Invoke with native arguments, returning the raw return value
    pub fn call<'a, A: IntoArgs<'a>>(&self, args: A) -> PackedResult<RetValue> {
        let slots = args.into_slots()?;
        let args = Args::from_slots(&slots);
        let mut ret = RetValue::default();
        self.call_packed(&args, &mut ret)?;
        Ok(ret)
    }

    /// Invoke with native arguments and extract the result
    pub fn invoke<'a, R, A>(&self, args: A) -> PackedResult<R>
    where
        R: for<'r> FromArg<'r>,
        A: IntoArgs<'a>,
    {
        let ret = self.call(args)?;
        ret.get()
    }
}

impl Clone for PackedFunc {
    /// Shares the current body; later `set_body` calls on either side don't
    /// affect the other.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: RwLock::new(self.body.read().clone()),
        }
    }
}

impl Default for PackedFunc {
    fn default() -> Self {
        Self {
            name: None,
            body: RwLock::new(None),
        }
    }
}

impl fmt::Debug for PackedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedFunc")
            .field("name", &self.name())
            .field("has_body", &self.has_body())
            .finish()
    }
}

impl TypeCode for PackedFunc {
    const DECLARED: TypeTag = TypeTag::Function;
}

crate::declare_registry!(PackedFunc, "PackedFunc", PackedFunc::with_name);

/// Call a packed function with native-looking syntax
///
/// `packed_call!(f, 1, "two")` is `f.invoke((1, "two"))`.
#[macro_export]
macro_rules! packed_call {
    ($func:expr $(, $arg:expr)* $(,)?) => {
        $func.invoke(($($arg,)*))
    };
}
