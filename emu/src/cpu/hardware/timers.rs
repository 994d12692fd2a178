//! The four hardware timers.
//!
//! A prescaled timer does not tick cycle by cycle: starting it schedules
//! one overflow event `(0x10000 - counter) * prescaler` cycles ahead and
//! the live counter value is derived from the clock on demand. Cascading
//! timers never touch the scheduler; they tick from the previous timer's
//! overflow, possibly by several steps at once.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::hardware::apu::Apu;
use crate::cpu::hardware::dma::Dma;
use crate::cpu::hardware::interrupts::{Interrupt, Interrupts};
use crate::scheduler::{EventClass, Scheduler};

const OVERFLOW_CLASSES: [EventClass; 4] = [
    EventClass::Timer0Overflow,
    EventClass::Timer1Overflow,
    EventClass::Timer2Overflow,
    EventClass::Timer3Overflow,
];

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Timer {
    /// Counter/Reload, `TMxCNT_L`. Writes set the reload value only.
    pub reload: u16,
    /// Control, `TMxCNT_H`.
    pub control: u16,
    /// Latched counter. Authoritative while stopped or cascading; while
    /// free-running the live value is derived from the clock.
    counter: u16,
    /// Clock timestamp the free-running counter is measured from.
    start_time: u64,
}

impl Timer {
    fn prescaler(&self) -> u64 {
        match self.control & 0b11 {
            0 => 1,
            1 => 64,
            2 => 256,
            _ => 1024,
        }
    }

    fn cascade(&self) -> bool {
        self.control.is_bit_on(2)
    }

    fn irq_enabled(&self) -> bool {
        self.control.is_bit_on(6)
    }

    pub fn running(&self) -> bool {
        self.control.is_bit_on(7)
    }

    fn cycles_until_overflow(&self) -> u64 {
        (0x1_0000 - u64::from(self.counter)) * self.prescaler()
    }

    fn counter_at(&self, now: u64) -> u16 {
        if self.running() && !self.cascade() {
            let elapsed = (now - self.start_time) / self.prescaler();
            self.counter.wrapping_add(elapsed as u16)
        } else {
            self.counter
        }
    }
}

#[derive(Default, Clone, Serialize, Deserialize)]
pub struct Timers {
    pub timers: [Timer; 4],
}

impl Timers {
    pub fn reset(&mut self) {
        self.timers = Default::default();
    }

    #[must_use]
    pub fn read_counter(&self, id: usize, scheduler: &Scheduler) -> u16 {
        self.timers[id].counter_at(scheduler.now())
    }

    pub fn write_reload(&mut self, id: usize, value: u16) {
        self.timers[id].reload = value;
    }

    #[must_use]
    pub fn read_control(&self, id: usize) -> u16 {
        self.timers[id].control
    }

    /// Control writes start, stop and reconfigure the timer. A start
    /// (enable rising edge) loads the counter from the reload register.
    pub fn write_control(&mut self, id: usize, value: u16, scheduler: &mut Scheduler) {
        let was_running = self.timers[id].running();

        // Latch the live counter before the prescaler can change under it.
        self.timers[id].counter = self.timers[id].counter_at(scheduler.now());

        // Timer 0 has nothing to cascade from; the bit reads back but is
        // ignored.
        let mask: u16 = if id == 0 { 0b1100_0011 } else { 0b1100_0111 };
        self.timers[id].control = value & mask;

        let timer = &mut self.timers[id];
        if timer.running() {
            if !was_running {
                timer.counter = timer.reload;
            }
            if timer.cascade() && id != 0 {
                scheduler.cancel(OVERFLOW_CLASSES[id]);
            } else {
                timer.start_time = scheduler.now();
                scheduler.add(timer.cycles_until_overflow(), OVERFLOW_CLASSES[id]);
            }
        } else {
            scheduler.cancel(OVERFLOW_CLASSES[id]);
        }
    }

    /// Scheduler handler for a free-running timer's overflow event.
    pub fn handle_overflow(
        &mut self,
        id: usize,
        scheduler: &mut Scheduler,
        interrupts: &mut Interrupts,
        apu: &mut Apu,
        dma: &mut Dma,
    ) {
        {
            let timer = &mut self.timers[id];
            timer.counter = timer.reload;
            timer.start_time = scheduler.now();
            scheduler.add(timer.cycles_until_overflow(), OVERFLOW_CLASSES[id]);
        }

        self.overflowed(id, 1, interrupts, apu, dma);
    }

    /// Propagate `times` overflows of timer `id`: IRQ, FIFO pacing, and
    /// the cascade chain into timer `id + 1`.
    fn overflowed(
        &mut self,
        id: usize,
        times: u32,
        interrupts: &mut Interrupts,
        apu: &mut Apu,
        dma: &mut Dma,
    ) {
        if self.timers[id].irq_enabled() {
            interrupts.raise(Interrupt::timer(id));
        }

        apu.on_timer_overflow(id, times, dma);

        if id < 3 && self.timers[id + 1].running() && self.timers[id + 1].cascade() {
            let next_times = self.tick_cascade(id + 1, times);
            if next_times > 0 {
                self.overflowed(id + 1, next_times, interrupts, apu, dma);
            }
        }
    }

    /// Advance a cascading timer by `ticks` steps, returning how many
    /// times it overflowed.
    fn tick_cascade(&mut self, id: usize, ticks: u32) -> u32 {
        let timer = &mut self.timers[id];
        let until_overflow = 0x1_0000 - u32::from(timer.counter);

        if ticks < until_overflow {
            timer.counter = timer.counter.wrapping_add(ticks as u16);
            return 0;
        }

        let period = 0x1_0000 - u32::from(timer.reload);
        let past_first = ticks - until_overflow;
        timer.counter = timer.reload.wrapping_add((past_first % period) as u16);
        1 + past_first / period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_one(
        timers: &mut Timers,
        scheduler: &mut Scheduler,
        interrupts: &mut Interrupts,
        apu: &mut Apu,
        dma: &mut Dma,
        target: u64,
    ) {
        while let Some((class, _)) = scheduler.advance_toward(target) {
            let id = OVERFLOW_CLASSES
                .iter()
                .position(|c| *c == class)
                .expect("only timer events scheduled here");
            timers.handle_overflow(id, scheduler, interrupts, apu, dma);
        }
    }

    #[test]
    fn start_schedules_overflow_from_reload() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.write_reload(0, 0xFFF0);
        timers.write_control(0, 0x0080, &mut scheduler);

        assert!(scheduler.is_scheduled(EventClass::Timer0Overflow));
        assert_eq!(scheduler.remaining_cycles(), 0x10);
    }

    #[test]
    fn counter_reads_derive_from_the_clock() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();

        timers.write_reload(0, 0x1000);
        // Prescaler 64, running.
        timers.write_control(0, 0x0081, &mut scheduler);

        while scheduler.advance_toward(640).is_some() {}
        assert_eq!(timers.read_counter(0, &scheduler), 0x100A);
    }

    #[test]
    fn overflow_raises_irq_and_reschedules() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();
        let mut interrupts = Interrupts::default();
        let mut apu = Apu::default();
        let mut dma = Dma::default();

        timers.write_reload(0, 0xFFFE);
        timers.write_control(0, 0x00C0, &mut scheduler);

        drain_one(
            &mut timers,
            &mut scheduler,
            &mut interrupts,
            &mut apu,
            &mut dma,
            2,
        );

        assert_eq!(
            interrupts.interrupt_request,
            1 << Interrupt::Timer0 as u16
        );
        // Rescheduled with the same 2-cycle period.
        assert_eq!(scheduler.remaining_cycles(), 2);
    }

    #[test]
    fn cascade_ticks_from_previous_overflow() {
        let mut timers = Timers::default();
        let mut scheduler = Scheduler::new();
        let mut interrupts = Interrupts::default();
        let mut apu = Apu::default();
        let mut dma = Dma::default();

        timers.write_reload(0, 0xFFFF);
        timers.write_control(0, 0x0080, &mut scheduler);
        timers.write_reload(1, 0xFFFE);
        // Cascade, IRQ enable, running.
        timers.write_control(1, 0x00C4, &mut scheduler);

        // Timer 0 overflows every cycle; timer 1 needs two ticks.
        drain_one(
            &mut timers,
            &mut scheduler,
            &mut interrupts,
            &mut apu,
            &mut dma,
            1,
        );
        assert_eq!(interrupts.interrupt_request, 0);

        drain_one(
            &mut timers,
            &mut scheduler,
            &mut interrupts,
            &mut apu,
            &mut dma,
            2,
        );
        assert_eq!(
            interrupts.interrupt_request,
            1 << Interrupt::Timer1 as u16
        );
    }

    #[test]
    fn cascade_multi_overflow_propagates_times() {
        let mut timers = Timers::default();

        timers.timers[1].reload = 0xFFFE;
        timers.timers[1].counter = 0xFFFE;

        // 5 ticks with period 2: overflows at tick 2 and 4.
        assert_eq!(timers.tick_cascade(1, 5), 2);
        assert_eq!(timers.timers[1].counter, 0xFFFF);
    }
}
