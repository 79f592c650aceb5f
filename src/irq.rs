//! Interrupt dispatch
//!
//! Each IRQ line carries a chain of handlers. A handler claims an interrupt
//! by returning [`IrqReturn::Handled`]; returning [`IrqReturn::None`] passes
//! it down the chain (shared lines, e.g. several NICs on one PCI interrupt).

use alloc::vec::Vec;

use crate::sync::IrqSpinlock;

/// Number of IRQ lines on the legacy PIC pair
pub const NR_IRQS: usize = 16;

/// What a handler did with the interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not ours, try the next handler in the chain
    None,
    /// Claimed; dispatch stops here
    Handled,
}

/// Interrupt handler: receives the line number and its registration cookie
pub type IrqHandler = fn(irq: u32, cookie: usize) -> IrqReturn;

struct IrqAction {
    handler: IrqHandler,
    cookie: usize,
}

struct IrqChains {
    chains: [Vec<IrqAction>; NR_IRQS],
}

impl IrqChains {
    const fn new() -> Self {
        const EMPTY: Vec<IrqAction> = Vec::new();
        Self {
            chains: [EMPTY; NR_IRQS],
        }
    }
}

static IRQS: IrqSpinlock<IrqChains> = IrqSpinlock::new(IrqChains::new());

/// Append a handler to an IRQ line's chain
///
/// Handlers run in registration order. Returns false for an out-of-range
/// line.
pub fn register_interrupt_handler(irq: u32, handler: IrqHandler, cookie: usize) -> bool {
    let mut irqs = IRQS.lock();
    let Some(chain) = irqs.chains.get_mut(irq as usize) else {
        return false;
    };
    chain.push(IrqAction { handler, cookie });
    true
}

/// Remove a handler from an IRQ line's chain
pub fn unregister_interrupt_handler(irq: u32, handler: IrqHandler, cookie: usize) -> bool {
    let mut irqs = IRQS.lock();
    let Some(chain) = irqs.chains.get_mut(irq as usize) else {
        return false;
    };
    match chain
        .iter()
        .position(|a| a.handler == handler && a.cookie == cookie)
    {
        Some(pos) => {
            chain.remove(pos);
            true
        }
        None => false,
    }
}

/// Walk an IRQ line's chain until a handler claims the interrupt
///
/// Returns true if some handler claimed it; an unclaimed interrupt on a
/// registered line is a spurious one and is simply dropped.
pub fn dispatch_irq(irq: u32) -> bool {
    let actions: Vec<(IrqHandler, usize)> = {
        let irqs = IRQS.lock();
        match irqs.chains.get(irq as usize) {
            Some(chain) => chain.iter().map(|a| (a.handler, a.cookie)).collect(),
            None => return false,
        }
    };
    for (handler, cookie) in actions {
        if handler(irq, cookie) == IrqReturn::Handled {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn pass(_irq: u32, _cookie: usize) -> IrqReturn {
        CALLS.fetch_add(1, Ordering::AcqRel);
        IrqReturn::None
    }

    fn claim(_irq: u32, _cookie: usize) -> IrqReturn {
        CALLS.fetch_add(1, Ordering::AcqRel);
        IrqReturn::Handled
    }

    #[test]
    fn chain_stops_at_first_claim() {
        // line 9 is unused by the other tests
        assert!(register_interrupt_handler(9, pass, 1));
        assert!(register_interrupt_handler(9, claim, 2));
        assert!(register_interrupt_handler(9, pass, 3));

        CALLS.store(0, Ordering::Release);
        assert!(dispatch_irq(9));
        // the handler after the claiming one never ran
        assert_eq!(CALLS.load(Ordering::Acquire), 2);

        assert!(unregister_interrupt_handler(9, claim, 2));
        CALLS.store(0, Ordering::Release);
        assert!(!dispatch_irq(9));
        assert_eq!(CALLS.load(Ordering::Acquire), 2);

        assert!(unregister_interrupt_handler(9, pass, 1));
        assert!(unregister_interrupt_handler(9, pass, 3));
        assert!(!unregister_interrupt_handler(9, pass, 3));
    }

    #[test]
    fn out_of_range_line_is_rejected() {
        assert!(!register_interrupt_handler(64, pass, 0));
        assert!(!dispatch_irq(64));
    }
}
