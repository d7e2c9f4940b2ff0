use super::Substrate;

/// A scoped interrupt mask: interrupts are masked when the guard is created
/// and allowed again when it is dropped. Guards nest, so an inner guard does
/// not re-enable interrupts masked by an outer one.
#[must_use = "interrupts are allowed again as soon as the guard is dropped"]
pub struct Guard<'a, S: Substrate> {
    substrate: &'a S,
}

impl<'a, S: Substrate> Guard<'a, S> {
    pub fn new(substrate: &'a S) -> Self {
        substrate.mask_interrupts();
        Self { substrate }
    }
}

impl<S: Substrate> Drop for Guard<'_, S> {
    fn drop(&mut self) {
        self.substrate.allow_interrupts();
    }
}

/// Execute the given closure with interrupts masked, returning the result of
/// the closure. The closure receives the guard as proof that interrupts are
/// masked. If interrupts were already masked, they remain masked after the
/// execution of the closure.
pub fn without<S, F, R>(substrate: &S, f: F) -> R
where
    S: Substrate,
    F: FnOnce(&Guard<'_, S>) -> R,
{
    let guard = Guard::new(substrate);
    f(&guard)
}
