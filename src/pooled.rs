//! Built-in [`Poolable`] implementations.
//!
//! This module provides pooling support for standard library types:
//!
//! - **Containers**: `Vec<T>`, `VecDeque<T>`, `HashMap<K, V>`, `HashSet<K>`
//! - **Strings**: `String`
//! - **Wrappers**: `Option<T>` and `Box<T>` where `T: Poolable`
//! - **IndexMap types** (with `indexmap` feature): `IndexMap<K, V>`, `IndexSet<K>`
//!
//! Containers are cleared when they are released, which keeps their
//! allocation around for the next user. `Vec`, `VecDeque` and `String` can also
//! be acquired with a minimum capacity through [Pool::acquire_with](crate::Pool::acquire_with).
use crate::{Hook, Init, Poolable, ThreadTag};
#[cfg(feature = "indexmap")]
use indexmap::{IndexMap, IndexSet};
use std::{
    cmp::Eq,
    collections::{HashMap, HashSet, VecDeque},
    default::Default,
    hash::{BuildHasher, Hash},
};

macro_rules! impl_hashmap {
    ($ty:ident) => {
        impl<K, V, R> Poolable for $ty<K, V, R>
        where
            K: Hash + Eq + Send + 'static,
            V: Send + 'static,
            R: Default + BuildHasher + Send + 'static,
        {
            fn empty() -> Self {
                $ty::default()
            }

            fn reset(&mut self) -> Hook {
                self.clear();
                Hook::ran(())
            }
        }
    };
}

impl_hashmap!(HashMap);
#[cfg(feature = "indexmap")]
impl_hashmap!(IndexMap);

macro_rules! impl_hashset {
    ($ty:ident) => {
        impl<K, R> Poolable for $ty<K, R>
        where
            K: Hash + Eq + Send + 'static,
            R: Default + BuildHasher + Send + 'static,
        {
            fn empty() -> Self {
                $ty::default()
            }

            fn reset(&mut self) -> Hook {
                self.clear();
                Hook::ran(())
            }
        }
    };
}

impl_hashset!(HashSet);
#[cfg(feature = "indexmap")]
impl_hashset!(IndexSet);

macro_rules! impl_sequence {
    ($ty:ty, $new:expr, [$($gen:tt)*]) => {
        impl<$($gen)*> Poolable for $ty {
            fn empty() -> Self {
                $new
            }

            fn reset(&mut self) -> Hook {
                self.clear();
                Hook::ran(())
            }
        }

        /// acquire with at least this much capacity
        impl<$($gen)*> Init<usize> for $ty {
            fn reinit(&mut self, capacity: usize) -> Hook<usize> {
                self.clear();
                self.reserve(capacity);
                Hook::ran(())
            }

            fn construct(capacity: usize) -> Self {
                <$ty>::with_capacity(capacity)
            }
        }
    };
}

impl_sequence!(Vec<T>, Vec::new(), [T: Send + 'static]);
impl_sequence!(VecDeque<T>, VecDeque::new(), [T: Send + 'static]);
impl_sequence!(String, String::new(), []);

impl<T: Poolable> Poolable for Option<T> {
    fn empty() -> Self {
        None
    }

    fn reset(&mut self) -> Hook {
        match self {
            Some(inner) => inner.reset(),
            None => Hook::ran(()),
        }
    }

    fn destroy(&mut self) -> Hook {
        match self {
            Some(inner) => inner.destroy(),
            None => Hook::Missing(()),
        }
    }
}

impl<T: Poolable> Poolable for Box<T> {
    fn empty() -> Self {
        Box::new(T::empty())
    }

    fn reset(&mut self) -> Hook {
        (**self).reset()
    }

    fn destroy(&mut self) -> Hook {
        (**self).destroy()
    }

    fn thread_tag(&self) -> Option<ThreadTag> {
        (**self).thread_tag()
    }

    fn set_thread_tag(&mut self, tag: ThreadTag) {
        (**self).set_thread_tag(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_clear_but_keep_capacity() {
        let mut v = vec![1u8; 100];
        assert!(matches!(v.reset(), Hook::Ran(Ok(()))));
        assert!(v.is_empty());
        assert!(v.capacity() >= 100);
        let mut m: HashMap<u32, String> = Poolable::empty();
        m.insert(1, "one".into());
        assert!(matches!(m.reset(), Hook::Ran(Ok(()))));
        assert!(m.is_empty());
    }

    #[test]
    fn capacity_args() {
        let s = <String as Init<usize>>::construct(64);
        assert!(s.capacity() >= 64);
        let mut v = vec![1u32, 2, 3];
        assert!(matches!(v.reinit(256), Hook::Ran(Ok(()))));
        assert!(v.is_empty());
        assert!(v.capacity() >= 256);
    }

    #[test]
    fn option_without_inner_hooks() {
        struct Plain;
        impl Poolable for Plain {
            fn empty() -> Self {
                Plain
            }
        }
        let mut o = Some(Plain);
        assert!(matches!(o.reset(), Hook::Missing(())));
        let mut o = None::<Vec<u8>>;
        assert!(matches!(o.reset(), Hook::Ran(Ok(()))));
        assert!(matches!(o.destroy(), Hook::Missing(())));
    }
}
