//! `Engine`: the single owning handle for everything this crate drives —
//! the pacing peripheral, both DMA channels, the backing memory pools,
//! the ALERT thread, and the WAVE/NOTIFY/CALLBK registries layered on top.
//!
//! One call maps every register block, builds INRING, starts PACER and the
//! input DMA channel, and spawns the alert thread; the matching teardown
//! stops the alert thread, resets both channels, disables pacing, and
//! releases the lock file. Rather than process-wide globals, every piece
//! of mutable state here is reachable only through `&self`, behind its own
//! `Mutex` — a single engine-wide lock would serialize gpio writes against
//! wave compilation against notification bookkeeping for no reason.
//! [`Engine`] itself is `Send + Sync`: every method takes `&self`, and the
//! alert thread spawned by [`Self::init_with_map`] runs concurrently with
//! any caller.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alert::{self, AlertLoop};
use crate::callback::{CallbackRegistry, EdgeLevel, Sample};
use crate::cb::{self, CbArena};
use crate::config::{Config, PacingPeripheral};
use crate::error::{Error, Result};
use crate::gpio::{self, Level, Mode, Pull, MAX_GPIO, MAX_USER_GPIO};
use crate::inring::{self, InRing, PULSES_PER_CYCLE};
use crate::notify::NotifyRegistry;
use crate::outring::{self, TxMode};
use crate::pacer::Pacer;
use crate::pmap::{DevMemMap, FakeMap, PeripheralMap};
use crate::pool::Pool;
use crate::regs::dma::{ChannelRegisters, Peripheral as DmaPeripheral};
use crate::regs::{clock, gpio as gpio_regs, offset, pcm, pwm, systimer};
use crate::wave::{merge_generic, Pulse, WaveId, WaveStore, Waveform};

/// Default path backing the process-wide init lock — a plain lock file
/// rather than a pidfile, since this crate has no daemon of its own.
const LOCK_PATH: &str = "/var/run/bcm283x-engine.lock";

/// Output ring CB pages reserved beyond whatever INRING needs, bounding how
/// long a compiled waveform may be (see [`Error::TooManyCbs`]).
const OUTPUT_CB_PAGES: usize = 4;
/// Output ring mask-word pages; independent of [`OUTPUT_CB_PAGES`] since a
/// bank-write control block's mask word is much smaller than the control
/// block itself (see `outring`'s module doc).
const OUTPUT_MASK_PAGES: usize = 2;

const DEFAULT_PWM_RANGE: u32 = 255;
const DEFAULT_PWM_FREQUENCY: u32 = 800;
/// `PI_MIN_DUTYCYCLE_RANGE`/`PI_MAX_DUTYCYCLE_RANGE`.
const MIN_PWM_RANGE: u32 = 25;
const MAX_PWM_RANGE: u32 = 40_000;
/// Lower bound is one hertz; the upper bound keeps a cycle's on/off pulses
/// from rounding to an unreasonably small fraction of a tick at the crate's
/// coarsest supported tick (10 microseconds) — [`outring::compile`] still
/// accepts such a waveform (sub-tick delays are clamped up to one tick
/// rather than rejected), this bound just keeps the requested frequency
/// sane.
const MIN_PWM_FREQUENCY: u32 = 1;
const MAX_PWM_FREQUENCY: u32 = 10_000;
/// `PI_DEFAULT_DUTYCYCLE_RANGE`-equivalent fixed period for servo pulses:
/// 50 Hz, i.e. a 20 millisecond frame.
const SERVO_PERIOD_US: u32 = 20_000;
/// `PI_MIN_SERVO_PULSEWIDTH`/`PI_MAX_SERVO_PULSEWIDTH`.
const MIN_SERVO_PULSEWIDTH_US: u32 = 500;
const MAX_SERVO_PULSEWIDTH_US: u32 = 2500;

/// One gpio's current software PWM/servo setting, used to recompute the
/// single shared repeat waveform whenever any gpio's duty cycle changes.
#[derive(Debug, Clone, Copy)]
struct PwmState {
    range: u32,
    frequency: u32,
    duty: u32,
}

impl Default for PwmState {
    fn default() -> Self {
        Self { range: DEFAULT_PWM_RANGE, frequency: DEFAULT_PWM_FREQUENCY, duty: 0 }
    }
}

/// Every register block `Engine` holds for its lifetime. A plain struct
/// rather than separate fields on `Engine` so the `Send`/`Sync` assertion
/// below only has to reason about one type.
struct Regs {
    gpio: &'static gpio_regs::Registers,
    clock: &'static clock::Registers,
    pwm: &'static pwm::Registers,
    pcm: &'static pcm::Registers,
    systimer: &'static systimer::Registers,
    in_channel: &'static ChannelRegisters,
    out_channel: &'static ChannelRegisters,
}

// SAFETY: these are `/dev/mem`-backed MMIO pointers; every access goes
// through the volatile register methods in `crate::regs`, which is sound
// to call from any thread the same way the underlying hardware tolerates
// access from any bus master. Nothing here relies on Rust's ordinary
// aliasing guarantees.
unsafe impl Send for Regs {}
unsafe impl Sync for Regs {}

/// The engine. See the module doc for the initialization/teardown sequence.
pub struct Engine {
    config: Config,
    #[allow(dead_code)]
    map: Arc<dyn PeripheralMap>,
    regs: Arc<Regs>,
    pacing: DmaPeripheral,
    tick_us: u32,
    gpset_bus: u32,
    gpclr_bus: u32,
    scratch_bus: u32,
    cb_pool: Arc<Mutex<Pool>>,
    mask_pool: Arc<Mutex<Pool>>,
    out_base: usize,
    wave_store: Arc<Mutex<WaveStore>>,
    notify: Arc<Mutex<NotifyRegistry>>,
    callbacks: Arc<Mutex<CallbackRegistry>>,
    pwm_state: Arc<Mutex<HashMap<u32, PwmState>>>,
    alert_running: Arc<AtomicBool>,
    alert_handle: Option<JoinHandle<()>>,
    lock_file: File,
}

const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Engine>();
};

impl Engine {
    /// Initializes the engine against real hardware: `/dev/mem`, the
    /// process lock at `/var/run/bcm283x-engine.lock`, and notification
    /// pipes under `/dev`. Picks [`FakeMap`] instead of [`DevMemMap`] when
    /// `BCM283X_ENGINE_FAKE_MEM` is set (a caller that wants a fake map
    /// without touching that environment variable should call
    /// [`Self::init_with_map`] directly).
    ///
    /// # Errors
    /// Returns [`Error::AlreadyInitialized`] if another instance already
    /// holds the lock file, or any of the mapping/allocation errors
    /// documented on [`Self::init_with_map`].
    pub fn init(config: Config) -> Result<Self> {
        let map: Arc<dyn PeripheralMap> =
            if crate::pmap::use_fake_mem() { Arc::new(FakeMap::new()) } else { Arc::new(DevMemMap::open()?) };
        Self::init_with(config, map, PathBuf::from(LOCK_PATH), PathBuf::from("/dev"))
    }

    /// Same initialization sequence as [`Self::init`], but against a
    /// caller-supplied [`PeripheralMap`], lock file path, and notification
    /// pipe directory. Integration tests use this so they never touch
    /// `/var/run` or `/dev/mem`.
    ///
    /// # Errors
    /// See [`Self::init`].
    pub fn init_with_map(config: Config, map: Arc<dyn PeripheralMap>, lock_path: PathBuf, pipe_dir: PathBuf) -> Result<Self> {
        Self::init_with(config, map, lock_path, pipe_dir)
    }

    fn init_with(config: Config, map: Arc<dyn PeripheralMap>, lock_path: PathBuf, pipe_dir: PathBuf) -> Result<Self> {
        config.validate()?;
        let lock_file = acquire_lock(&lock_path)?;

        let gpio_regs = map_block::<gpio_regs::Registers>(&*map, offset::GPIO)?;
        let clock_regs = map_block::<clock::Registers>(&*map, offset::CLOCK)?;
        let pwm_regs = map_block::<pwm::Registers>(&*map, offset::PWM)?;
        let pcm_regs = map_block::<pcm::Registers>(&*map, offset::PCM)?;
        let systimer_regs = map_block::<systimer::Registers>(&*map, offset::SYSTIMER)?;
        let dma_base = map.map_physical(map.peripheral_base() + offset::DMA as u64, map.page_len())?;
        let in_channel = dma_channel(dma_base, config.primary_dma_channel());
        let out_channel = dma_channel(dma_base, config.secondary_dma_channel());

        let regs = Arc::new(Regs {
            gpio: gpio_regs,
            clock: clock_regs,
            pwm: pwm_regs,
            pcm: pcm_regs,
            systimer: systimer_regs,
            in_channel,
            out_channel,
        });

        let settle = || std::thread::sleep(Duration::from_micros(10));
        let pacer = Pacer::new(regs.clock, regs.pwm, regs.pcm);
        let pacing = pacer.start(&config, settle)?;
        log::info!("pacing peripheral started: {:?}", config.pacing_peripheral());

        let page_len = map.page_len();
        let tick_us = config.tick_us().as_micros();
        let cycles = Self::choose_cycle_count(&config, tick_us, page_len);

        let in_ring_cbs = cycles * inring::cbs_per_cycle();
        let cbs_per_page = cb::cbs_per_page(page_len);
        let in_ring_pages = in_ring_cbs.div_ceil(cbs_per_page);
        let cb_pages = in_ring_pages + OUTPUT_CB_PAGES;

        let mut cb_pool = Pool::allocate(&*map, cb_pages, page_len)?;
        let mut mask_pool = Pool::allocate(&*map, OUTPUT_MASK_PAGES, page_len)?;
        let levels_pool = Pool::allocate(&*map, 1, page_len)?;
        let ticks_pool = Pool::allocate(&*map, 1, page_len)?;
        let on_mask_pool = Pool::allocate(&*map, 1, page_len)?;
        let off_mask_pool = Pool::allocate(&*map, 1, page_len)?;

        let gpio_bus = crate::regs::bus_alias(offset::GPIO, gpio_regs::GPLEV0_OFFSET);
        let gpset_bus = crate::regs::bus_alias(offset::GPIO, gpio_regs::GPSET0_OFFSET);
        let gpclr_bus = crate::regs::bus_alias(offset::GPIO, gpio_regs::GPCLR0_OFFSET);
        let systimer_bus = crate::regs::bus_alias(offset::SYSTIMER, systimer::CLO_OFFSET);
        let scratch_bus = match config.pacing_peripheral() {
            PacingPeripheral::Pwm => crate::regs::bus_alias(offset::PWM, pwm::FIFO_OFFSET),
            PacingPeripheral::Pcm => crate::regs::bus_alias(offset::PCM, pcm::FIFO_OFFSET),
        };

        let (in_ring, in_ring_base_bus) = {
            let mut arena = CbArena::new(&mut cb_pool);
            let ring = InRing::build(
                &mut arena,
                0,
                cycles,
                pacing,
                gpio_bus,
                systimer_bus,
                gpset_bus,
                gpclr_bus,
                &levels_pool,
                &ticks_pool,
                &on_mask_pool,
                &off_mask_pool,
            )?;
            let base_bus = arena.bus_addr(0);
            (ring, base_bus)
        };
        inring::start(regs.in_channel, in_ring_base_bus);

        let out_base = in_ring_cbs;

        let wave_store = Arc::new(Mutex::new(WaveStore::new()));
        let notify = Arc::new(Mutex::new(NotifyRegistry::new(pipe_dir)));
        let callbacks = Arc::new(Mutex::new(CallbackRegistry::new()));
        let pwm_state = Arc::new(Mutex::new(HashMap::new()));

        let cb_pool = Arc::new(Mutex::new(cb_pool));
        let mask_pool = Arc::new(Mutex::new(mask_pool));

        let alert_running = Arc::new(AtomicBool::new(true));
        let alert_handle = {
            let regs = Arc::clone(&regs);
            let notify = Arc::clone(&notify);
            let callbacks = Arc::clone(&callbacks);
            let running = Arc::clone(&alert_running);
            let mut in_ring = in_ring;
            let mut alert_loop = AlertLoop::new(tick_us);
            let cb_size = std::mem::size_of::<crate::regs::dma::ControlBlock>();
            Some(alert::spawn(Duration::from_micros(850), running, move || {
                // Keep the on/off-mask pages alive for as long as this
                // thread (and therefore the ring's CBs, which still
                // reference their bus addresses) runs; nothing reads them
                // back in software.
                let _ = (&on_mask_pool, &off_mask_pool);
                in_ring.refresh(&levels_pool, &ticks_pool);
                let current_bus = regs.in_channel.current_cb();
                let cb_linear = (current_bus.wrapping_sub(in_ring_base_bus) as usize / cb_size) % in_ring_cbs.max(1);
                let slot_linear = inring::slot_linear_from_cb(cb_linear);
                let now_tick = regs.systimer.low();
                let mut notify_guard = notify.lock().unwrap_or_else(PoisonError::into_inner);
                let mut callbacks_guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                alert_loop.step(
                    in_ring.levels(),
                    in_ring.ticks(),
                    PULSES_PER_CYCLE,
                    slot_linear,
                    now_tick,
                    &mut callbacks_guard,
                    &mut notify_guard,
                );
                if let Some(err) = inring::take_error(regs.in_channel) {
                    log::error!("input ring dma channel reported {err:?}");
                }
            }))
        };

        Ok(Self {
            config,
            map,
            regs,
            pacing,
            tick_us,
            gpset_bus,
            gpclr_bus,
            scratch_bus,
            cb_pool,
            mask_pool,
            out_base,
            wave_store,
            notify,
            callbacks,
            pwm_state,
            alert_running,
            alert_handle,
            lock_file,
        })
    }

    /// Picks how many INRING cycles to build: enough for
    /// `config.sample_buffer_ms()`, clamped to whatever fits in one page of
    /// level/tick storage apiece (see [`InRing`]'s doc comment). A
    /// clamp here is logged, not an error — the engine still runs, just
    /// with a shorter window than requested.
    fn choose_cycle_count(config: &Config, tick_us: u32, page_len: usize) -> usize {
        let requested = (u64::from(config.sample_buffer_ms()) * 1000
            / (u64::from(tick_us) * PULSES_PER_CYCLE as u64))
            .max(1) as usize;
        let page_words = page_len / 4;
        let max_by_levels = page_words / PULSES_PER_CYCLE;
        let max_by_ticks = page_words;
        let cycles = requested.min(max_by_levels).min(max_by_ticks).max(1);
        if cycles < requested {
            log::warn!(
                "sample_buffer_ms={} at tick_us={} would need {} ring cycles; clamped to {} to fit one page of sample storage",
                config.sample_buffer_ms(),
                tick_us,
                requested,
                cycles
            );
        }
        cycles
    }

    /// The configuration this engine was initialized with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- gpio ----

    pub fn set_mode(&self, gpio_num: u32, mode: Mode) -> Result<()> {
        gpio::set_mode(self.regs.gpio, gpio_num, mode)
    }

    pub fn get_mode(&self, gpio_num: u32) -> Result<Mode> {
        gpio::get_mode(self.regs.gpio, gpio_num)
    }

    pub fn set_pull(&self, gpio_num: u32, pull: Pull) -> Result<()> {
        gpio::set_pull(self.regs.gpio, gpio_num, pull, || std::thread::sleep(Duration::from_micros(10)))
    }

    pub fn read(&self, gpio_num: u32) -> Result<Level> {
        gpio::read(self.regs.gpio, gpio_num)
    }

    /// Drives `gpio_num` to `level` directly, bypassing any active
    /// software PWM/servo/waveform output on that pin.
    ///
    /// # Errors
    /// Returns [`Error::BadGpio`] if `gpio_num` exceeds [`MAX_GPIO`], or
    /// [`Error::NotPermitted`] if the configured permission mask excludes
    /// it.
    pub fn write(&self, gpio_num: u32, level: Level) -> Result<()> {
        if gpio_num > MAX_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        if !self.config.is_permitted(gpio_num) {
            return Err(Error::NotPermitted);
        }
        gpio::write(self.regs.gpio, gpio_num, level)
    }

    // ---- pwm / servo convenience, built atop a shared OUTRING repeat chain ----

    /// Sets `gpio_num`'s PWM duty cycle range (the denominator
    /// [`Self::set_pwm_dutycycle`]'s argument is measured against).
    ///
    /// # Errors
    /// Returns [`Error::BadGpio`] if `gpio_num` exceeds [`MAX_USER_GPIO`], or
    /// [`Error::BadDutyRange`] if `range` is outside `25..=40000`.
    pub fn set_pwm_range(&self, gpio_num: u32, range: u32) -> Result<()> {
        if gpio_num > MAX_USER_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        if !(MIN_PWM_RANGE..=MAX_PWM_RANGE).contains(&range) {
            return Err(Error::BadDutyRange(range));
        }
        let mut states = self.pwm_state.lock().unwrap_or_else(PoisonError::into_inner);
        states.entry(gpio_num).or_default().range = range;
        Ok(())
    }

    /// Sets `gpio_num`'s PWM frequency in hertz.
    ///
    /// # Errors
    /// Returns [`Error::BadGpio`] if `gpio_num` exceeds [`MAX_USER_GPIO`], or
    /// [`Error::BadFrequency`] if `frequency` is out of range.
    pub fn set_pwm_frequency(&self, gpio_num: u32, frequency: u32) -> Result<()> {
        if gpio_num > MAX_USER_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        if !(MIN_PWM_FREQUENCY..=MAX_PWM_FREQUENCY).contains(&frequency) {
            return Err(Error::BadFrequency(frequency));
        }
        let mut states = self.pwm_state.lock().unwrap_or_else(PoisonError::into_inner);
        states.entry(gpio_num).or_default().frequency = frequency;
        Ok(())
    }

    /// Sets `gpio_num`'s PWM duty cycle (against its currently configured
    /// range) and recompiles the shared software-PWM waveform across every
    /// gpio with a non-zero duty cycle. Every software-PWM gpio shares the
    /// one output DMA channel, so this merges all of their pulse trains
    /// into a single repeating waveform rather than giving each gpio its
    /// own independent output.
    ///
    /// # Errors
    /// Returns [`Error::BadGpio`], [`Error::NotPermitted`], or
    /// [`Error::BadDutycycle`] if `duty` exceeds the gpio's configured
    /// range, plus anything [`outring::compile`] can return if the merged
    /// waveform no longer fits in the reserved output pages.
    pub fn set_pwm_dutycycle(&self, gpio_num: u32, duty: u32) -> Result<()> {
        if gpio_num > MAX_USER_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        if !self.config.is_permitted(gpio_num) {
            return Err(Error::NotPermitted);
        }
        {
            let mut states = self.pwm_state.lock().unwrap_or_else(PoisonError::into_inner);
            let state = states.entry(gpio_num).or_default();
            if duty > state.range {
                return Err(Error::BadDutycycle(duty));
            }
            state.duty = duty;
        }
        self.recompute_pwm_wave()
    }

    /// Drives `gpio_num` with a fixed-width pulse repeated every 20
    /// milliseconds, the same mechanism [`Self::set_pwm_dutycycle`] uses
    /// with the range/frequency pinned to standard hobby-servo timing.
    /// `pulsewidth_us == 0` stops driving the gpio and leaves it low.
    ///
    /// # Errors
    /// Returns [`Error::BadGpio`], [`Error::NotPermitted`], or
    /// [`Error::BadPulsewidth`] if `pulsewidth_us` is non-zero but outside
    /// `500..=2500`.
    pub fn set_servo_pulsewidth(&self, gpio_num: u32, pulsewidth_us: u32) -> Result<()> {
        if gpio_num > MAX_USER_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        if !self.config.is_permitted(gpio_num) {
            return Err(Error::NotPermitted);
        }
        if pulsewidth_us != 0 && !(MIN_SERVO_PULSEWIDTH_US..=MAX_SERVO_PULSEWIDTH_US).contains(&pulsewidth_us) {
            return Err(Error::BadPulsewidth(pulsewidth_us));
        }
        {
            let mut states = self.pwm_state.lock().unwrap_or_else(PoisonError::into_inner);
            let state = states.entry(gpio_num).or_default();
            state.range = SERVO_PERIOD_US;
            state.frequency = 1_000_000 / SERVO_PERIOD_US;
            state.duty = pulsewidth_us;
        }
        self.recompute_pwm_wave()?;
        if pulsewidth_us == 0 {
            gpio::write(self.regs.gpio, gpio_num, Level::Low)?;
        }
        Ok(())
    }

    /// Rebuilds the one shared software-PWM/servo waveform from every
    /// gpio's current `PwmState`, merging each gpio's on/off pulse pair
    /// into a combined pulse train via [`merge_generic`], then loads it
    /// onto the output channel in repeat mode. A gpio at duty zero
    /// contributes nothing; if no gpio has a non-zero duty, the output
    /// channel is simply stopped.
    fn recompute_pwm_wave(&self) -> Result<()> {
        let states = self.pwm_state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut merged: Vec<Pulse> = Vec::new();
        for (&gpio_num, state) in states.iter() {
            if state.duty == 0 {
                continue;
            }
            let mask = 1_u32 << gpio_num;
            let period_us = (1_000_000 / state.frequency.max(1)).max(1);
            let on_us = if state.duty >= state.range {
                period_us
            } else {
                ((u64::from(period_us) * u64::from(state.duty)) / u64::from(state.range.max(1))) as u32
            }
            .max(1);
            let pulses = if on_us >= period_us {
                vec![Pulse { gpio_on: mask, gpio_off: 0, us_delay: period_us }]
            } else {
                vec![
                    Pulse { gpio_on: mask, gpio_off: 0, us_delay: on_us },
                    Pulse { gpio_on: 0, gpio_off: mask, us_delay: period_us - on_us },
                ]
            };
            merged = merge_generic(&merged, &pulses)?;
        }
        drop(states);

        if merged.is_empty() {
            outring::stop(self.regs.out_channel);
            return Ok(());
        }

        let mut scratch = WaveStore::new();
        scratch.add_generic(&merged)?;
        let id = scratch.create()?;
        let waveform = scratch.get(id).expect("just created").clone();
        self.load_output_wave(&waveform, TxMode::Repeat)
    }

    // ---- wave store / transmit ----

    pub fn wave_add_generic(&self, pulses: &[Pulse]) -> Result<()> {
        self.wave_store.lock().unwrap_or_else(PoisonError::into_inner).add_generic(pulses)
    }

    pub fn wave_add_serial(&self, gpio_num: u32, baud: u32, offset_us: u32, data: &[u8]) -> Result<()> {
        self.wave_store.lock().unwrap_or_else(PoisonError::into_inner).add_serial(gpio_num, baud, offset_us, data)
    }

    pub fn wave_create(&self) -> Result<WaveId> {
        self.wave_store.lock().unwrap_or_else(PoisonError::into_inner).create()
    }

    pub fn wave_delete(&self, id: WaveId) -> Result<()> {
        self.wave_store.lock().unwrap_or_else(PoisonError::into_inner).delete(id)
    }

    /// Compiles and transmits waveform `id` on the output channel,
    /// replacing whatever it was previously doing (including a running
    /// software PWM/servo chain — both share the one hardware channel).
    ///
    /// # Errors
    /// Returns [`Error::BadWaveId`] if `id` is not a live waveform, plus
    /// anything [`outring::compile`] can return.
    pub fn wave_tx_send(&self, id: WaveId, mode: TxMode) -> Result<()> {
        let waveform = {
            let store = self.wave_store.lock().unwrap_or_else(PoisonError::into_inner);
            store.get(id).cloned().ok_or(Error::BadWaveId)?
        };
        self.load_output_wave(&waveform, mode)
    }

    pub fn wave_tx_stop(&self) {
        outring::stop(self.regs.out_channel);
    }

    #[must_use]
    pub fn wave_tx_busy(&self) -> bool {
        self.regs.out_channel.is_active()
    }

    fn load_output_wave(&self, waveform: &Waveform, mode: TxMode) -> Result<()> {
        let mut cb_pool = self.cb_pool.lock().unwrap_or_else(PoisonError::into_inner);
        let mut mask_pool = self.mask_pool.lock().unwrap_or_else(PoisonError::into_inner);
        let mut arena = CbArena::new(&mut cb_pool);
        let compiled = outring::compile(
            &mut arena,
            &mut mask_pool,
            self.out_base,
            0,
            waveform,
            self.tick_us,
            mode,
            self.pacing,
            self.gpset_bus,
            self.gpclr_bus,
            self.scratch_bus,
        )?;
        self.regs.out_channel.reset();
        self.regs.out_channel.start(compiled.start_bus_addr);
        Ok(())
    }

    // ---- notify ----

    pub fn notify_open(&self) -> Result<u32> {
        self.notify.lock().unwrap_or_else(PoisonError::into_inner).open()
    }

    pub fn notify_begin(&self, handle: u32, bits: u32) -> Result<()> {
        self.notify.lock().unwrap_or_else(PoisonError::into_inner).begin(handle, bits)
    }

    pub fn notify_pause(&self, handle: u32) -> Result<()> {
        self.notify.lock().unwrap_or_else(PoisonError::into_inner).pause(handle)
    }

    pub fn notify_close(&self, handle: u32) -> Result<()> {
        self.notify.lock().unwrap_or_else(PoisonError::into_inner).close(handle)
    }

    // ---- callbacks ----

    pub fn set_edge_callback(&self, gpio_num: u32, callback: Option<Box<dyn FnMut(u32, EdgeLevel, u32) + Send>>) -> Result<()> {
        if gpio_num > MAX_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).set_edge(gpio_num, callback);
        Ok(())
    }

    pub fn set_watchdog(&self, gpio_num: u32, timeout_ms: Option<u32>) -> Result<()> {
        if gpio_num > MAX_GPIO {
            return Err(Error::BadGpio(gpio_num));
        }
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).set_watchdog(gpio_num, timeout_ms);
        Ok(())
    }

    /// Installs (or clears) the batched-sample callback, restricted to
    /// `bits`: `bits` folds into the alert thread's monitor mask exactly as
    /// an edge callback's own gpio would, so slots are only handed to this
    /// callback while at least one bit in `bits` changes.
    pub fn set_sample_callback(&self, callback: Option<Box<dyn FnMut(&[Sample]) + Send>>, bits: u32) {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner).set_sample(callback, bits);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.alert_running.store(false, Ordering::Release);
        if let Some(handle) = self.alert_handle.take() {
            let _ = handle.join();
        }
        outring::stop(self.regs.out_channel);
        self.regs.in_channel.reset();
        Pacer::new(self.regs.clock, self.regs.pwm, self.regs.pcm).stop(&self.config);

        if let Ok(mut notify) = self.notify.lock() {
            for handle in 0..crate::notify::MAX_HANDLES as u32 {
                let _ = notify.close(handle);
            }
        }
        // SAFETY: releasing the advisory lock taken in `init_with`; the
        // descriptor itself closes right after via `File`'s own `Drop`.
        unsafe {
            libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
        }
        log::info!("engine terminated");
    }
}

/// Opens (creating if needed) and exclusively, non-blockingly `flock`s the
/// process-wide init lock: a second `Engine::init` while one is already
/// running must fail fast rather than race it for the same DMA channels.
fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|_| Error::InitFailed("open lock file failed"))?;
    // SAFETY: `file`'s descriptor is valid for the duration of this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(Error::AlreadyInitialized);
    }
    Ok(file)
}

/// Maps one peripheral's register page and reinterprets it as `T`.
///
/// # Safety (not a literal `unsafe fn`, but the cast inside one is)
/// `T` must be one of the `register_structs!` blocks under `crate::regs`,
/// sized to fit within `map.page_len()` bytes at `block_offset`.
fn map_block<T>(map: &dyn PeripheralMap, block_offset: usize) -> Result<&'static T> {
    let ptr = map.map_physical(map.peripheral_base() + block_offset as u64, map.page_len())?;
    // SAFETY: see function doc; the mapping lives as long as `map` does,
    // which the caller holds for the engine's own lifetime.
    Ok(unsafe { &*ptr.as_ptr().cast::<T>() })
}

/// Returns channel `channel`'s register file within the shared DMA page
/// mapped at `dma_base`.
///
/// # Safety (not a literal `unsafe fn`, but the cast inside one is)
/// `channel` must be `<= 14` (`Config::validate` already enforces this),
/// keeping the computed offset within the one page `dma_base` maps.
fn dma_channel(dma_base: NonNull<u32>, channel: u8) -> &'static ChannelRegisters {
    let byte_offset = usize::from(channel) * offset::DMA_CHANNEL_STRIDE;
    // SAFETY: see function doc.
    unsafe { &*dma_base.as_ptr().cast::<u8>().add(byte_offset).cast::<ChannelRegisters>() }
}
