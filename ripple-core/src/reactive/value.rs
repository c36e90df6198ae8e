//! Values that may or may not be reactive.
//!
//! APIs that accept "a value or a cell holding one" take a [`Value`].
//! [`unwrap`] reads through a cell (registering a dependency), [`peek`]
//! reads through it without one, and plain values pass straight through.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;

use super::computed::Computed;
use super::observable::Observable;

/// Anything a [`Value`] can read through.
pub trait Readable<T> {
    /// Read the value, registering a dependency when one is being captured.
    fn read(&self) -> Result<T>;

    /// Read the value without registering a dependency.
    fn read_untracked(&self) -> Result<T>;
}

impl<T: Clone + 'static> Readable<T> for Observable<T> {
    fn read(&self) -> Result<T> {
        Ok(self.get())
    }

    fn read_untracked(&self) -> Result<T> {
        Ok(self.peek())
    }
}

impl<T: Clone + 'static> Readable<T> for Computed<T> {
    fn read(&self) -> Result<T> {
        self.try_get()
    }

    fn read_untracked(&self) -> Result<T> {
        self.try_peek()
    }
}

/// A plain value or a reactive cell.
pub enum Value<T> {
    Plain(T),
    Cell(Rc<dyn Readable<T>>),
}

impl<T: Clone> Value<T> {
    /// Wrap any readable cell.
    pub fn cell(cell: impl Readable<T> + 'static) -> Self {
        Self::Cell(Rc::new(cell))
    }

    /// Whether this wraps a reactive cell.
    pub fn is_cell(&self) -> bool {
        matches!(self, Self::Cell(_))
    }

    /// Read the value, registering a dependency if it is a cell.
    pub fn get(&self) -> Result<T> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Cell(cell) => cell.read(),
        }
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> Result<T> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Cell(cell) => cell.read_untracked(),
        }
    }
}

impl<T: Clone + 'static> From<Observable<T>> for Value<T> {
    fn from(observable: Observable<T>) -> Self {
        Self::cell(observable)
    }
}

impl<T: Clone + 'static> From<Computed<T>> for Value<T> {
    fn from(computed: Computed<T>) -> Self {
        Self::cell(computed)
    }
}

impl<T: Clone> Clone for Value<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Plain(value) => Self::Plain(value.clone()),
            Self::Cell(cell) => Self::Cell(Rc::clone(cell)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Self::Cell(_) => f.write_str("Cell(..)"),
        }
    }
}

/// Read `value`, registering a dependency if it is a cell.
pub fn unwrap<T: Clone>(value: &Value<T>) -> Result<T> {
    value.get()
}

/// Read `value` without registering a dependency.
pub fn peek<T: Clone>(value: &Value<T>) -> Result<T> {
    value.peek()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_pass_through() {
        let value = Value::Plain(7);
        assert!(!value.is_cell());
        assert_eq!(unwrap(&value).unwrap(), 7);
        assert_eq!(peek(&value).unwrap(), 7);
    }

    #[test]
    fn unwrap_inside_a_computed_registers_a_dependency() {
        let source = Observable::new(1);
        let value: Value<i32> = source.clone().into();

        let tracked = {
            let value = value.clone();
            Computed::try_new(move || unwrap(&value)).unwrap()
        };
        let untracked = {
            let value = value.clone();
            Computed::try_new(move || peek(&value)).unwrap()
        };

        assert_eq!(tracked.dependency_count(), 1);
        assert_eq!(untracked.dependency_count(), 0);

        source.set(2);
        assert_eq!(tracked.get(), 2);
        assert_eq!(untracked.get(), 1);
    }

    #[test]
    fn computed_cells_can_be_unwrapped() {
        let doubled = Computed::new(|| 21 * 2);
        let value = Value::from(doubled);
        assert!(value.is_cell());
        assert_eq!(unwrap(&value).unwrap(), 42);
    }
}
