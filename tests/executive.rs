// =============================================================================
// keel — Executive Integration Tests
// =============================================================================
//
// These drive the executive through its public API with a scripted port:
// `context_switch` pops a closure from a queue and runs it, standing in
// for whatever the "other" tasks would do while the caller is blocked.
// Reschedule requests are recorded so tests can assert which cores were
// poked.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use keel::task::Queue;
use keel::{
    Action, Affinity, Config, CoreId, DeliveryMode, Executive, Handler, KernError, Port, SigSet,
    Signo, TaskId, TaskSpec, SIG_TERM,
};

type Step = Box<dyn FnOnce(&Executive<ScriptPort>) + Send>;

#[derive(Default)]
struct ScriptPort {
    script: Mutex<VecDeque<Step>>,
    in_irq: AtomicBool,
    resched: Mutex<Vec<CoreId>>,
}

impl ScriptPort {
    fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    fn resched_log(&self) -> Vec<CoreId> {
        self.resched.lock().unwrap().clone()
    }
}

impl Port for ScriptPort {
    fn context_switch(&self, exec: &Executive<Self>, _core: CoreId) {
        let step = self.script.lock().unwrap().pop_front();
        if let Some(step) = step {
            step(exec);
        }
    }

    fn request_reschedule(&self, core: CoreId) {
        self.resched.lock().unwrap().push(core);
    }

    fn in_interrupt(&self) -> bool {
        self.in_irq.load(Ordering::Relaxed)
    }
}

/// Build an executive with one idle task registered per core.
fn executive(cores: usize) -> (Executive<ScriptPort>, Vec<TaskId>) {
    let exec = Executive::new(
        Config {
            cores,
            sig_pool: 8,
            sig_irq_pool: 2,
        },
        ScriptPort::default(),
    );
    let idles = (0..cores)
        .map(|core| {
            exec.task_register(TaskSpec {
                tid: 1000 + core as u64,
                priority: 0,
                affinity: Affinity::only(core),
                delivery: DeliveryMode::KernelDirect,
                idle_on: Some(core),
            })
            .unwrap()
        })
        .collect();
    (exec, idles)
}

/// Register an ordinary task and admit it through pending + merge.
fn spawn(exec: &Executive<ScriptPort>, tid: u64, prio: u8) -> TaskId {
    let id = exec
        .task_register(TaskSpec {
            tid,
            priority: prio,
            affinity: Affinity::ANY,
            delivery: DeliveryMode::KernelDirect,
            idle_on: None,
        })
        .unwrap();
    exec.enqueue_pending(id).unwrap();
    exec.merge();
    id
}

// ── Semaphores ──────────────────────────────────────────────────

#[test]
fn uncontended_wait_and_post_round_trip() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    assert_eq!(exec.reschedule(0), Some(a));

    let sem = exec.sem_init(1, false);
    assert_eq!(exec.sem_wait(sem, a), Ok(()));
    let info = exec.sem_info(sem).unwrap();
    assert_eq!(info.count, 0);
    assert_eq!(info.holders, 1);

    assert_eq!(exec.sem_post(sem, a), Ok(()));
    let info = exec.sem_info(sem).unwrap();
    assert_eq!(info.count, 1);
    assert_eq!(info.holders, 0);
}

#[test]
fn blocked_wait_resumes_after_post() {
    let (exec, idles) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.reschedule(0);
    assert_eq!(exec.current(0), Some(a));

    let sem = exec.sem_init(0, false);
    let idle = idles[0];
    exec.port().push(Box::new(move |e| {
        // Runs "while a is blocked": the core fell back to idle.
        assert_eq!(e.current(0), Some(idle));
        assert_eq!(e.sem_info(sem).unwrap().waiters, 1);
        e.sem_post(sem, idle).unwrap();
    }));

    assert_eq!(exec.sem_wait(sem, a), Ok(()));
    let info = exec.sem_info(sem).unwrap();
    assert_eq!(info.waiters, 0);
    assert_eq!(info.holders, 1);
}

#[test]
fn wait_without_port_handoff_reports_wait_not_started() {
    // A port that returns from context_switch without the task having
    // been woken must surface as WaitNotStarted, not as success.
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.reschedule(0);

    let sem = exec.sem_init(0, false);
    assert_eq!(exec.sem_wait(sem, a), Err(KernError::WaitNotStarted));
    assert_eq!(exec.sem_info(sem).unwrap().waiters, 1);
}

#[test]
fn destroy_with_waiters_is_refused() {
    let (exec, idles) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.reschedule(0);

    let sem = exec.sem_init(0, false);
    let idle = idles[0];
    exec.port().push(Box::new(move |e| {
        assert_eq!(e.sem_destroy(sem), Err(KernError::Busy));
        e.sem_post(sem, idle).unwrap();
    }));
    assert_eq!(exec.sem_wait(sem, a), Ok(()));

    assert_eq!(exec.sem_destroy(sem), Ok(()));
    assert_eq!(exec.sem_info(sem), Err(KernError::InvalidObject));
}

// ── Priority inheritance ────────────────────────────────────────

#[test]
fn holder_inherits_waiter_priority_until_post() {
    let (exec, _) = executive(1);
    let low = spawn(&exec, 1, 10);
    exec.reschedule(0);
    assert_eq!(exec.current(0), Some(low));

    let sem = exec.sem_init(1, true);
    assert_eq!(exec.sem_wait(sem, low), Ok(()));

    let high = spawn(&exec, 2, 50);
    exec.reschedule(0);
    assert_eq!(exec.current(0), Some(high));

    exec.port().push(Box::new(move |e| {
        // The boost put the holder back on the core while high waits.
        assert_eq!(e.task_info(low).unwrap().eff_prio, 50);
        assert_eq!(e.current(0), Some(low));
        e.sem_post(sem, low).unwrap();
    }));
    assert_eq!(exec.sem_wait(sem, high), Ok(()));

    let info = exec.task_info(low).unwrap();
    assert_eq!(info.eff_prio, 10);
    assert_eq!(info.base_prio, 10);
    // The expired boost reopened the core for the woken waiter.
    assert_eq!(exec.reschedule(0), Some(high));
}

// ── SMP placement ───────────────────────────────────────────────

#[test]
fn smp_merge_targets_lowest_priority_core_and_preempts() {
    let (exec, _) = executive(2);
    let a = spawn(&exec, 1, 80);
    let b = spawn(&exec, 2, 95);
    let c = spawn(&exec, 3, 90);

    // 80 landed first, 95 took the other core, 90 then displaced 80.
    assert_eq!(exec.current(0), Some(c));
    assert_eq!(exec.current(1), Some(b));
    assert_eq!(exec.task_info(a).unwrap().queue, Queue::Ready(0));

    let log = exec.port().resched_log();
    assert!(log.contains(&0));
    assert!(log.contains(&1));
}

// ── Scheduler lock ──────────────────────────────────────────────

#[test]
fn locked_merge_is_deferred_until_unlock() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.reschedule(0);
    assert_eq!(exec.current(0), Some(a));

    let guard = exec.lock_scheduler();
    let b = spawn(&exec, 2, 50);
    // Admitted but not promoted: the running task keeps the core.
    assert_eq!(exec.current(0), Some(a));
    assert_eq!(exec.task_info(b).unwrap().queue, Queue::Pending);

    drop(guard);
    assert!(exec.port().resched_log().contains(&0));
    assert_eq!(exec.reschedule(0), Some(b));
}

// ── Signals ─────────────────────────────────────────────────────

static INTERRUPTED_LOG: Mutex<Vec<(u8, u64)>> = Mutex::new(Vec::new());
fn record_interrupted(signo: Signo, payload: u64) {
    INTERRUPTED_LOG.lock().unwrap().push((signo.0, payload));
}

#[test]
fn signal_interrupts_wait_and_dispatches_after_unwind() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.reschedule(0);

    exec.sig_action(
        a,
        Signo(5),
        Some(Action {
            handler: Handler::Kernel(record_interrupted),
            mask: SigSet::empty(),
        }),
    )
    .unwrap();

    let sem = exec.sem_init(0, false);
    exec.port().push(Box::new(move |e| {
        e.raise(a, Signo(5), 7).unwrap();
    }));

    // The wait reports interruption; the count is already rolled back.
    assert_eq!(exec.sem_wait(sem, a), Err(KernError::Interrupted));
    assert_eq!(exec.sem_info(sem).unwrap().count, 0);
    assert_eq!(exec.sem_info(sem).unwrap().waiters, 0);
    assert_eq!(exec.signal_pending(a), Ok(true));

    exec.dispatch(a).unwrap();
    assert_eq!(exec.signal_pending(a), Ok(false));
    assert_eq!(INTERRUPTED_LOG.lock().unwrap().as_slice(), &[(5, 7)]);
}

static MASKED_LOG: Mutex<Vec<u64>> = Mutex::new(Vec::new());
fn record_masked(_signo: Signo, payload: u64) {
    MASKED_LOG.lock().unwrap().push(payload);
}

#[test]
fn masked_signals_park_until_unmasked_and_pools_are_bounded() {
    let exec = Executive::new(
        Config {
            cores: 1,
            sig_pool: 2,
            sig_irq_pool: 1,
        },
        ScriptPort::default(),
    );
    exec.task_register(TaskSpec {
        tid: 1000,
        priority: 0,
        affinity: Affinity::only(0),
        delivery: DeliveryMode::KernelDirect,
        idle_on: Some(0),
    })
    .unwrap();
    let a = spawn(&exec, 1, 10);

    exec.sig_action(
        a,
        Signo(3),
        Some(Action {
            handler: Handler::Kernel(record_masked),
            mask: SigSet::empty(),
        }),
    )
    .unwrap();
    exec.sig_set_mask(a, SigSet::of(Signo(3))).unwrap();

    // Normal pool: two entries, then exhaustion.
    assert_eq!(exec.raise(a, Signo(3), 1), Ok(()));
    assert_eq!(exec.raise(a, Signo(3), 2), Ok(()));
    assert_eq!(exec.raise(a, Signo(3), 3), Err(KernError::PoolExhausted));

    // Interrupt pool is separate and similarly bounded.
    exec.port().in_irq.store(true, Ordering::Relaxed);
    assert_eq!(exec.raise(a, Signo(3), 4), Ok(()));
    assert_eq!(exec.raise(a, Signo(3), 5), Err(KernError::PoolExhausted));
    exec.port().in_irq.store(false, Ordering::Relaxed);

    // All parked: nothing deliverable while the mask covers them.
    assert_eq!(exec.signal_pending(a), Ok(false));

    // Shrinking the mask releases them, in arrival order.
    exec.sig_set_mask(a, SigSet::empty()).unwrap();
    assert_eq!(exec.signal_pending(a), Ok(true));
    exec.dispatch(a).unwrap();
    assert_eq!(MASKED_LOG.lock().unwrap().as_slice(), &[1, 2, 4]);

    // Dispatch returned every entry to its pool.
    assert_eq!(exec.raise(a, Signo(3), 6), Ok(()));
    assert_eq!(exec.raise(a, Signo(3), 7), Ok(()));
}

#[test]
fn unregistered_signal_is_discarded() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    assert_eq!(exec.raise(a, Signo(4), 0), Ok(()));
    assert_eq!(exec.signal_pending(a), Ok(false));

    assert_eq!(exec.raise(a, Signo(32), 0), Err(KernError::InvalidObject));
}

#[test]
fn termination_signal_cannot_be_masked() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.sig_set_mask(a, SigSet::ALL).unwrap();
    let effective = exec.sig_set_mask(a, SigSet::empty()).unwrap();
    assert!(!effective.has(SIG_TERM));
    assert_eq!(effective, SigSet::ALL - SigSet::of(SIG_TERM));
}

static CLEANUP_LOG: Mutex<Vec<u8>> = Mutex::new(Vec::new());
fn record_cleanup(signo: Signo, _payload: u64) {
    CLEANUP_LOG.lock().unwrap().push(signo.0);
}

#[test]
fn termination_runs_cleanup_then_reclaims_the_task() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);

    exec.sig_action(
        a,
        SIG_TERM,
        Some(Action {
            handler: Handler::Kernel(record_cleanup),
            mask: SigSet::empty(),
        }),
    )
    .unwrap();

    assert_eq!(exec.raise(a, SIG_TERM, 0), Ok(()));
    exec.dispatch(a).unwrap();

    assert_eq!(CLEANUP_LOG.lock().unwrap().as_slice(), &[SIG_TERM.0]);
    let info = exec.task_info(a).unwrap();
    assert!(info.exited);
    assert_eq!(info.queue, Queue::None);

    assert_eq!(exec.task_remove(a), Ok(()));
    assert_eq!(exec.task_info(a), Err(KernError::InvalidObject));
}

// ── Handles ─────────────────────────────────────────────────────

#[test]
fn stale_task_handles_are_rejected() {
    let (exec, _) = executive(1);
    let a = exec
        .task_register(TaskSpec {
            tid: 1,
            priority: 10,
            affinity: Affinity::ANY,
            delivery: DeliveryMode::KernelDirect,
            idle_on: None,
        })
        .unwrap();
    assert_eq!(exec.task_remove(a), Ok(()));
    assert_eq!(exec.enqueue_pending(a), Err(KernError::InvalidObject));
    assert_eq!(exec.task_info(a), Err(KernError::InvalidObject));
}

#[test]
fn terminated_holder_releases_units_before_reclaim() {
    let (exec, _) = executive(1);
    let first = spawn(&exec, 1, 10);
    exec.reschedule(0);

    let sem = exec.sem_init(1, true);
    assert_eq!(exec.sem_wait(sem, first), Ok(()));

    // Terminate the holder and reclaim its slot entirely.
    assert_eq!(exec.raise(first, SIG_TERM, 0), Ok(()));
    exec.dispatch(first).unwrap();
    assert_eq!(exec.task_remove(first), Ok(()));

    // The unit came back and no holder entry survived it.
    let info = exec.sem_info(sem).unwrap();
    assert_eq!(info.count, 1);
    assert_eq!(info.holders, 0);

    // Fresh tasks contend on the same semaphore: the inheritance walk
    // must see only live holders.
    let mid = spawn(&exec, 2, 20);
    exec.reschedule(0);
    assert_eq!(exec.sem_wait(sem, mid), Ok(()));

    let high = spawn(&exec, 3, 50);
    exec.reschedule(0);
    exec.port().push(Box::new(move |e| {
        assert_eq!(e.task_info(mid).unwrap().eff_prio, 50);
        e.sem_post(sem, mid).unwrap();
    }));
    assert_eq!(exec.sem_wait(sem, high), Ok(()));
    assert_eq!(exec.task_info(mid).unwrap().eff_prio, 20);
}

static UNCOVERED_LOG: Mutex<Vec<u64>> = Mutex::new(Vec::new());
fn record_uncovered(_signo: Signo, payload: u64) {
    UNCOVERED_LOG.lock().unwrap().push(payload);
}

#[test]
fn unmasking_a_parked_signal_unwinds_a_blocked_wait() {
    let (exec, _) = executive(1);
    let a = spawn(&exec, 1, 10);
    exec.reschedule(0);

    exec.sig_action(
        a,
        Signo(6),
        Some(Action {
            handler: Handler::Kernel(record_uncovered),
            mask: SigSet::empty(),
        }),
    )
    .unwrap();
    exec.sig_set_mask(a, SigSet::of(Signo(6))).unwrap();

    let sem = exec.sem_init(0, false);
    exec.port().push(Box::new(move |e| {
        // Masked: the signal parks without touching the wait.
        e.raise(a, Signo(6), 9).unwrap();
        assert_eq!(e.sem_info(sem).unwrap().waiters, 1);
        assert_eq!(e.signal_pending(a), Ok(false));
        // Unmasking makes it deliverable, so the wait unwinds now.
        e.sig_set_mask(a, SigSet::empty()).unwrap();
        assert_eq!(e.sem_info(sem).unwrap().waiters, 0);
    }));

    assert_eq!(exec.sem_wait(sem, a), Err(KernError::Interrupted));
    assert_eq!(exec.sem_info(sem).unwrap().count, 0);
    assert_eq!(exec.signal_pending(a), Ok(true));

    exec.dispatch(a).unwrap();
    assert_eq!(UNCOVERED_LOG.lock().unwrap().as_slice(), &[9]);
}

#[test]
fn affinity_permitting_no_core_is_rejected() {
    let (exec, _) = executive(1);
    let err = exec.task_register(TaskSpec {
        tid: 7,
        priority: 10,
        affinity: Affinity::only(5),
        delivery: DeliveryMode::KernelDirect,
        idle_on: None,
    });
    assert_eq!(err.unwrap_err(), KernError::InvalidObject);
}
