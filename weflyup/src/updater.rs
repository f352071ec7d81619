//! Firmware update session.
//!
//! An [`Updater`] owns the port for the whole session. A complete update is
//!
//! 1. `$update start`
//! 2. every frame of the FPGA image (`.mcs`)
//! 3. every frame of the MCU image (`.hex`)
//! 4. `$update stop`
//!
//! Each frame is sent and acknowledged before the next one goes out. A frame
//! is retried a bounded number of times; running out of attempts aborts the
//! whole update.
//!
//! ## Example
//!
//! ```rust,no_run
//! use weflyup::{SimulatedDevice, SimulatedPort, Updater};
//!
//! fn main() -> weflyup::Result<()> {
//!     let port = SimulatedPort::new(SimulatedDevice::default());
//!     let mut updater = Updater::new(port);
//!
//!     let session = updater.identify()?;
//!     println!("{} firmware {}", session.kind, session.version);
//!
//!     updater.update("fw.mcs", "fw.hex", &mut |event| println!("{event:?}"))?;
//!     updater.close()
//! }
//! ```

use {
    crate::{
        cancel::CancelToken,
        error::{Error, Result},
        image::record::parse_record_file,
        port::Port,
        protocol::{
            DeviceSession, Frame, ResponseReader, Target, TimingConfig, TransferOutcome,
            classify_ack, handshake::Handshake,
        },
    },
    log::{debug, info, warn},
    std::{fmt, path::Path, sync::mpsc, thread},
};

/// Step of an update, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum UpdatePhase {
    /// `$update start`.
    Handshake,
    /// FPGA image transfer.
    Fpga,
    /// MCU image transfer.
    Mcu,
    /// `$update stop`.
    Finish,
}

impl UpdatePhase {
    /// Transfer phase of an image.
    pub fn for_target(target: Target) -> Self {
        match target {
            Target::Fpga => Self::Fpga,
            Target::Mcu => Self::Mcu,
        }
    }
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake => f.write_str("Handshake"),
            Self::Fpga => f.write_str("FPGA transfer"),
            Self::Mcu => f.write_str("MCU transfer"),
            Self::Finish => f.write_str("Stop handshake"),
        }
    }
}

/// Progress notification emitted during [`Updater::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// A phase begins.
    PhaseStarted(UpdatePhase),
    /// Share of an image acknowledged so far.
    Progress {
        /// Image being sent.
        target: Target,
        /// 0 to 100.
        percent: u8,
    },
    /// A frame was not acknowledged and will be resent if attempts remain.
    FrameRetry {
        /// Image being sent.
        target: Target,
        /// Sequence number of the frame.
        sequence: u16,
        /// Failed attempt, starting at 1.
        attempt: u32,
        /// How the attempt failed.
        outcome: TransferOutcome,
    },
    /// Both images were sent and the device confirmed the stop.
    Finished,
}

/// Percentage of `total` frames done after `done` frames.
#[allow(clippy::cast_possible_truncation)] // done <= total, so the result is at most 100
fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        (done * 100 / total) as u8
    }
}

/// Whether a frame is worth a debug line.
fn is_logged(sequence: u16) -> bool {
    sequence < 5 || sequence % 100 == 0
}

/// Update session over a port.
pub struct Updater<P: Port> {
    port: P,
    timing: TimingConfig,
    cancel: CancelToken,
    session: Option<DeviceSession>,
}

impl<P: Port> Updater<P> {
    /// Create an updater on an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            timing: TimingConfig::default(),
            cancel: CancelToken::new(),
            session: None,
        }
    }

    /// Use different protocol timings.
    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Stop at the next frame once `cancel` is triggered.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the updater and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Device identified by the last successful [`identify`](Self::identify).
    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.as_ref()
    }

    /// Query the device kind and firmware version.
    pub fn identify(&mut self) -> Result<DeviceSession> {
        info!("Identifying device on {}", self.port.name());
        let session = Handshake::new(&mut self.port, &self.timing).probe_version()?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Enter update mode.
    pub fn start_update(&mut self) -> Result<()> {
        Handshake::new(&mut self.port, &self.timing).start()?;
        info!("Device entered update mode");
        Ok(())
    }

    /// Leave update mode.
    pub fn stop_update(&mut self) -> Result<()> {
        Handshake::new(&mut self.port, &self.timing).stop()?;
        info!("Device confirmed end of update");
        Ok(())
    }

    /// Send one frame until it is acknowledged or attempts run out.
    pub fn send_frame_with_retry<F>(&mut self, frame: &Frame, observer: &mut F) -> Result<()>
    where
        F: FnMut(UpdateEvent),
    {
        let data = frame.encode()?;
        let attempts = self.timing.max_frame_attempts;

        for attempt in 1..=attempts {
            self.port.write_all_bytes(&data)?;
            if is_logged(frame.sequence) {
                debug!(
                    "TX frame #{}: len={}, addr=0x{:08X}",
                    frame.sequence,
                    frame.payload.len(),
                    frame.address
                );
            }

            let response = ResponseReader::new(&mut self.port, &self.timing)
                .read_within(self.timing.frame_timeout)?;

            let outcome = classify_ack(&response);
            if outcome == TransferOutcome::Acknowledged {
                return Ok(());
            }

            match outcome {
                TransferOutcome::Garbled => warn!(
                    "{} frame #{}: unexpected reply {:?} (attempt {attempt}/{attempts})",
                    frame.target,
                    frame.sequence,
                    response.trim()
                ),
                _ => warn!(
                    "{} frame #{}: {outcome} (attempt {attempt}/{attempts})",
                    frame.target, frame.sequence
                ),
            }
            observer(UpdateEvent::FrameRetry {
                target: frame.target,
                sequence: frame.sequence,
                attempt,
                outcome,
            });
        }

        Err(Error::ResponseTimeout {
            target: frame.target,
            sequence: frame.sequence,
            attempts,
        })
    }

    /// Send the frames of one image in order.
    pub fn transmit_frames<F>(&mut self, frames: &[Frame], observer: &mut F) -> Result<()>
    where
        F: FnMut(UpdateEvent),
    {
        let Some(first) = frames.first() else {
            warn!("Image has no data records, nothing to send");
            return Ok(());
        };
        let target = first.target;
        let total = frames.len();

        for (i, frame) in frames.iter().enumerate() {
            self.cancel.check()?;
            self.send_frame_with_retry(frame, observer)?;
            observer(UpdateEvent::Progress {
                target,
                percent: percent(i + 1, total),
            });
        }

        debug!("{target} image: {total} frames acknowledged");
        Ok(())
    }

    /// Parse a record file and send its frames.
    ///
    /// Returns the number of frames sent.
    pub fn transmit_image<F>(
        &mut self,
        path: impl AsRef<Path>,
        target: Target,
        observer: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(UpdateEvent),
    {
        let frames = parse_record_file(path, target)?;
        self.transmit_frames(&frames, observer)?;
        Ok(frames.len())
    }

    /// Run a complete update with an FPGA and an MCU image.
    ///
    /// Both files are parsed before the device is put into update mode.
    /// Errors carry the phase they occurred in.
    pub fn update<F>(
        &mut self,
        mcs: impl AsRef<Path>,
        hex: impl AsRef<Path>,
        observer: &mut F,
    ) -> Result<()>
    where
        F: FnMut(UpdateEvent),
    {
        let fpga = parse_record_file(mcs, Target::Fpga).map_err(|e| e.in_phase(UpdatePhase::Fpga))?;
        let mcu = parse_record_file(hex, Target::Mcu).map_err(|e| e.in_phase(UpdatePhase::Mcu))?;
        info!(
            "Loaded {} FPGA frames and {} MCU frames",
            fpga.len(),
            mcu.len()
        );

        observer(UpdateEvent::PhaseStarted(UpdatePhase::Handshake));
        self.cancel
            .check()
            .and_then(|()| self.start_update())
            .map_err(|e| e.in_phase(UpdatePhase::Handshake))?;

        for frames in [&fpga, &mcu] {
            let Some(target) = frames.first().map(|f| f.target) else {
                continue;
            };
            let phase = UpdatePhase::for_target(target);
            observer(UpdateEvent::PhaseStarted(phase));
            info!("Sending {target} image");
            self.transmit_frames(frames, observer)
                .map_err(|e| e.in_phase(phase))?;
        }

        observer(UpdateEvent::PhaseStarted(UpdatePhase::Finish));
        self.stop_update()
            .map_err(|e| e.in_phase(UpdatePhase::Finish))?;

        observer(UpdateEvent::Finished);
        info!("Update complete");
        Ok(())
    }

    /// Close the session, discarding any buffered data.
    pub fn close(mut self) -> Result<()> {
        self.port.close()
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::Updater;
    use crate::error::Result;
    use crate::port::{NativePort, SerialConfig};

    impl Updater<NativePort> {
        /// Open `port_name` and create an updater on it.
        ///
        /// A busy port is retried a few times before giving up.
        pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
            let config = SerialConfig::new(port_name, baud_rate);
            Ok(Self::new(NativePort::open_exclusive(&config)?))
        }
    }
}

/// Handle to an update running on a worker thread.
pub struct UpdateHandle<P: Port> {
    /// Progress events, closed when the update ends.
    pub events: mpsc::Receiver<UpdateEvent>,
    thread: thread::JoinHandle<(Updater<P>, Result<()>)>,
}

impl<P: Port> UpdateHandle<P> {
    /// Wait for the update to end.
    ///
    /// Returns the updater so the caller can close it.
    pub fn join(self) -> Result<(Updater<P>, Result<()>)> {
        self.thread
            .join()
            .map_err(|_| Error::Io(std::io::Error::other("update worker panicked")))
    }
}

/// Run [`Updater::update`] on a worker thread.
///
/// Events arrive on [`UpdateHandle::events`] while the update runs.
pub fn spawn_update<P>(
    mut updater: Updater<P>,
    mcs: impl AsRef<Path> + Send + 'static,
    hex: impl AsRef<Path> + Send + 'static,
) -> UpdateHandle<P>
where
    P: Port + 'static,
{
    let (tx, events) = mpsc::channel();
    let thread = thread::spawn(move || {
        let result = updater.update(mcs, hex, &mut |event| {
            // The receiver may be gone if the caller stopped listening.
            let _ = tx.send(event);
        });
        (updater, result)
    });

    UpdateHandle { events, thread }
}
