use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};
use core::slice;

/// A fixed-capacity vector that lives on the stack or in static memory.
pub struct StaticVec<T, const N: usize> {
    data: [MaybeUninit<T>; N],
    len: usize,
}

impl<T, const N: usize> Default for StaticVec<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> StaticVec<T, N> {
    pub const fn new() -> Self {
        Self {
            data: [const { MaybeUninit::uninit() }; N],
            len: 0,
        }
    }

    #[inline(always)]
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
    }

    #[inline(always)]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.len < N {
            // Safety: bounds checked above.
            unsafe { self.data.get_unchecked_mut(self.len).write(item) };
            self.len += 1;
            Ok(())
        } else {
            Err(item)
        }
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Option<T> {
        if self.len > 0 {
            self.len -= 1;
            // Safety: the element at the old tail is initialized and is no
            // longer reachable through `len`.
            Some(unsafe { self.data.get_unchecked(self.len).assume_init_read() })
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        N
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[T] {
        // Safety: data[0..len] is initialized.
        unsafe { slice::from_raw_parts(self.data.as_ptr() as *const T, self.len) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // Safety: data[0..len] is initialized.
        unsafe { slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut T, self.len) }
    }
}

impl<T, const N: usize> Drop for StaticVec<T, N> {
    fn drop(&mut self) {
        self.clear();
    }
}

// Allow indexing like a normal slice
impl<T, const N: usize> Deref for StaticVec<T, N> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T, const N: usize> DerefMut for StaticVec<T, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_until_full() {
        let mut v: StaticVec<u32, 2> = StaticVec::new();
        assert!(v.push(1).is_ok());
        assert!(v.push(2).is_ok());
        assert_eq!(v.push(3), Err(3));
        assert_eq!(&v[..], &[1, 2]);
        assert_eq!(v.capacity(), 2);
    }

    #[test]
    fn elements_are_dropped() {
        use std::rc::Rc;

        let shared = Rc::new(());
        {
            let mut v: StaticVec<Rc<()>, 4> = StaticVec::new();
            let _ = v.push(shared.clone());
            let _ = v.push(shared.clone());
            assert_eq!(Rc::strong_count(&shared), 3);
        }
        assert_eq!(Rc::strong_count(&shared), 1);
    }

    #[test]
    fn slice_access() {
        let mut v: StaticVec<Option<u8>, 4> = StaticVec::new();
        let _ = v.push(Some(1));
        let _ = v.push(None);
        v[1] = Some(5);
        assert_eq!(v.iter().flatten().sum::<u8>(), 6);
        assert_eq!(v.pop(), Some(Some(5)));
        assert_eq!(v.len(), 1);
    }
}
