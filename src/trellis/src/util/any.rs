use std::any::{self, Any, TypeId};
use std::ops::Deref;
use std::sync::Arc;

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>
    where
        Self: Send + Sync;

    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>
    where
        Self: Send + Sync,
    {
        self
    }

    #[inline]
    fn type_name(&self) -> &'static str {
        any::type_name::<T>()
    }
}

pub trait DowncastRef {
    fn is<T: Any>(&self) -> bool;

    fn concrete_type_id(&self) -> TypeId;

    fn downcast_ref<T: Any>(&self) -> Option<&T>;
}

impl<S> DowncastRef for S
where
    S: Deref<Target: AsAny>,
{
    #[inline]
    fn is<T: Any>(&self) -> bool {
        (**self).as_any().is::<T>()
    }

    #[inline]
    fn concrete_type_id(&self) -> TypeId {
        (**self).as_any().type_id()
    }

    #[inline]
    fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (**self).as_any().downcast_ref::<T>()
    }
}

pub trait Downcast: DowncastRef + Sized {
    type Output<T>;

    fn downcast<T: Any + Send + Sync>(self) -> Result<Self::Output<T>, Self>;
}

impl<S> Downcast for Arc<S>
where
    S: AsAny + Send + Sync + ?Sized,
{
    type Output<T> = Arc<T>;

    fn downcast<T: Any + Send + Sync>(self) -> Result<Self::Output<T>, Self> {
        if self.is::<T>() {
            let res = self
                .into_any_arc()
                .downcast::<T>()
                .unwrap_or_else(|_| std::unreachable!("`self` should be `Arc<T>`"));
            Ok(res)
        } else {
            Err(self)
        }
    }
}

/// Strips module paths from a type name, so `alloc::vec::Vec<my::Item>`
/// becomes `Vec<Item>`.
pub fn short_type_name(full: &str) -> String {
    fn last_segment(path: &str) -> &str {
        path.rsplit("::").next().unwrap_or(path)
    }

    let mut short = String::with_capacity(full.len());
    let mut path = String::new();
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
        } else {
            short.push_str(last_segment(&path));
            path.clear();
            short.push(c);
        }
    }
    short.push_str(last_segment(&path));
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Trait: AsAny + Send + Sync {}

    impl Trait for i32 {}

    #[test]
    fn downcast_succeeds_when_receiver_is_an_arc() {
        let x: Arc<dyn Trait> = Arc::new(1i32);

        assert!(x.is::<i32>());
        assert_eq!(x.downcast_ref::<i32>(), Some(&1));
        assert_eq!(x.concrete_type_id(), TypeId::of::<i32>());

        let y = x.downcast::<i32>().unwrap_or(Arc::new(0));
        assert_eq!(*y, 1);
    }

    #[test]
    fn downcast_fails_when_type_mismatches() {
        let x: Arc<dyn Trait> = Arc::new(1i32);
        assert!(x.downcast::<u32>().is_err());
    }

    #[test]
    fn short_type_name_strips_paths_inside_generics() {
        assert_eq!(short_type_name("i32"), "i32");
        assert_eq!(short_type_name("my_crate::service::Database"), "Database");
        assert_eq!(
            short_type_name("alloc::vec::Vec<my_crate::Item>"),
            "Vec<Item>"
        );
        assert_eq!(
            short_type_name("(a::B, core::option::Option<c::D>)"),
            "(B, Option<D>)"
        );
    }
}
