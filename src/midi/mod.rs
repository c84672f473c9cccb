/// MIDI output using midir - clicks become percussion notes sent on time
use midir::MidiOutput;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::clock::AudioClock;
use crate::error::{MetronomeError, Result};

const CLIENT_NAME: &str = "mtrnm MIDI Output";

/// GM percussion lives on channel 10.
const PERCUSSION_CHANNEL: u8 = 9;
const NOTE_ON: u8 = 0x90 | PERCUSSION_CHANNEL;
const NOTE_OFF: u8 = 0x80 | PERCUSSION_CHANNEL;

/// Hi Wood Block
pub const ACCENT_NOTE: u8 = 76;
/// Low Wood Block
pub const BEAT_NOTE: u8 = 77;

/// Maps a [0, 1] amplitude onto a MIDI velocity; any audible tone gets at least 1.
pub fn velocity(amplitude: f32) -> u8 {
    if amplitude <= 0.0 || amplitude.is_nan() {
        return 0;
    }
    (amplitude.min(1.0) * 127.0).round().clamp(1.0, 127.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimedMessage {
    time: f64,
    bytes: [u8; 3],
}

/// Note messages waiting for their time, kept sorted.
#[derive(Debug, Default)]
struct MessageQueue {
    messages: Vec<TimedMessage>,
}

impl MessageQueue {
    fn push(&mut self, time: f64, bytes: [u8; 3]) {
        // Equal times keep arrival order so a note-off never overtakes its note-on.
        let at = self.messages.partition_point(|m| m.time <= time);
        self.messages.insert(at, TimedMessage { time, bytes });
    }

    fn push_tone(&mut self, time: f64, accent: bool, duration: f64, amplitude: f32) {
        let note = if accent { ACCENT_NOTE } else { BEAT_NOTE };
        self.push(time, [NOTE_ON, note, velocity(amplitude)]);
        self.push(time + duration, [NOTE_OFF, note, 0]);
    }

    fn next_due(&self) -> Option<f64> {
        self.messages.first().map(|m| m.time)
    }

    fn pop_due(&mut self, now: f64) -> Vec<[u8; 3]> {
        let due = self.messages.partition_point(|m| m.time <= now);
        self.messages.drain(..due).map(|m| m.bytes).collect()
    }
}

enum Command {
    Tone {
        time: f64,
        accent: bool,
        duration: f64,
        amplitude: f32,
    },
    Shutdown,
}

/// Audio clock that realizes clicks as MIDI notes.
///
/// Time is measured from connection. A dispatcher thread sleeps until each
/// message is due, so its jitter is bounded by the OS timer but never
/// accumulates across beats.
pub struct MidiClock {
    epoch: Instant,
    commands: Mutex<Sender<Command>>,
    ready: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MidiClock {
    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(port_index: usize) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| MetronomeError::Midi(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| MetronomeError::Midi(format!("invalid port index {}", port_index)))?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "unknown".to_string());

        let mut connection = midi_out
            .connect(port, "mtrnm")
            .map_err(|e| MetronomeError::Midi(format!("failed to connect: {}", e)))?;

        info!(
            port = %port_name,
            accent = %midi_note_name(ACCENT_NOTE),
            beat = %midi_note_name(BEAT_NOTE),
            "MIDI click output connected"
        );
        Self::with_sink(move |bytes| connection.send(bytes).map_err(|e| e.to_string()))
    }

    /// Drive any byte sink instead of a midir connection.
    pub fn with_sink<F>(sink: F) -> Result<Self>
    where
        F: FnMut(&[u8]) -> std::result::Result<(), String> + Send + 'static,
    {
        let (sender, receiver) = channel();
        let epoch = Instant::now();
        let ready = Arc::new(AtomicBool::new(true));
        let dispatcher_ready = Arc::clone(&ready);
        let mut sink = sink;

        let dispatcher = thread::Builder::new()
            .name("mtrnm-midi".to_string())
            .spawn(move || {
                let mut queue = MessageQueue::default();
                let mut send = |bytes: &[u8]| {
                    if let Err(e) = sink(bytes) {
                        warn!(error = %e, "MIDI send failed");
                        dispatcher_ready.store(false, Ordering::Release);
                    }
                };

                loop {
                    let command = match queue.next_due() {
                        Some(due) => {
                            let wait = (due - epoch.elapsed().as_secs_f64()).max(0.0);
                            receiver.recv_timeout(Duration::from_secs_f64(wait))
                        }
                        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match command {
                        Ok(Command::Tone {
                            time,
                            accent,
                            duration,
                            amplitude,
                        }) => queue.push_tone(time, accent, duration, amplitude),
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    for bytes in queue.pop_due(epoch.elapsed().as_secs_f64()) {
                        send(bytes.as_slice());
                    }
                }

                for note in [ACCENT_NOTE, BEAT_NOTE] {
                    send([NOTE_OFF, note, 0].as_slice());
                }
            })?;

        Ok(Self {
            epoch,
            commands: Mutex::new(sender),
            ready,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }
}

impl AudioClock for MidiClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule_tone(&self, time: f64, accent: bool, duration: f64, amplitude: f32) {
        if velocity(amplitude) == 0 {
            return;
        }
        let command = Command::Tone {
            time,
            accent,
            duration,
            amplitude,
        };
        let sent = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(command);
        if sent.is_err() {
            self.ready.store(false, Ordering::Release);
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Drop for MidiClock {
    fn drop(&mut self) {
        let _ = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Command::Shutdown);
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.join();
        }
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

    fn recording_clock() -> (MidiClock, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let clock = MidiClock::with_sink(move |bytes| {
            sink.lock().unwrap().push(bytes.to_vec());
            Ok(())
        })
        .unwrap();
        (clock, sent)
    }

    fn wait_for(sent: &Sent, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if sent.lock().unwrap().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_velocity_mapping() {
        assert_eq!(velocity(0.0), 0);
        assert_eq!(velocity(-1.0), 0);
        assert_eq!(velocity(1.0), 127);
        assert_eq!(velocity(0.5), 64);
        assert_eq!(velocity(0.001), 1);
    }

    #[test]
    fn test_queue_orders_by_time() {
        let mut queue = MessageQueue::default();
        queue.push_tone(1.0, false, 0.05, 1.0);
        queue.push_tone(0.5, true, 0.05, 1.0);
        assert_eq!(queue.next_due(), Some(0.5));

        assert!(queue.pop_due(0.4).is_empty());
        assert_eq!(
            queue.pop_due(0.6),
            vec![[NOTE_ON, ACCENT_NOTE, 127], [NOTE_OFF, ACCENT_NOTE, 0]]
        );
        assert_eq!(queue.pop_due(2.0).len(), 2);
        assert_eq!(queue.next_due(), None);
    }

    #[test]
    fn test_note_off_never_precedes_note_on() {
        let mut queue = MessageQueue::default();
        queue.push(1.0, [NOTE_ON, BEAT_NOTE, 100]);
        queue.push(1.0, [NOTE_OFF, BEAT_NOTE, 0]);
        assert_eq!(queue.pop_due(1.0)[0][0], NOTE_ON);
    }

    #[test]
    fn test_dispatches_tone_on_percussion_channel() {
        let (clock, sent) = recording_clock();
        clock.schedule_tone(clock.now() + 0.005, true, 0.005, 1.0);

        assert!(wait_for(&sent, 2));
        let messages = sent.lock().unwrap().clone();
        assert_eq!(messages[0], vec![0x99, ACCENT_NOTE, 127]);
        assert_eq!(messages[1], vec![0x89, ACCENT_NOTE, 0]);
    }

    #[test]
    fn test_silent_tone_sends_nothing() {
        let (clock, sent) = recording_clock();
        clock.schedule_tone(0.0, false, 0.001, 0.0);
        thread::sleep(Duration::from_millis(20));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_silences_notes() {
        let (clock, sent) = recording_clock();
        drop(clock);

        let messages = sent.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![vec![NOTE_OFF, ACCENT_NOTE, 0], vec![NOTE_OFF, BEAT_NOTE, 0]]
        );
    }

    #[test]
    fn test_failed_send_marks_clock_unready() {
        let clock = MidiClock::with_sink(|_| Err("port closed".to_string())).unwrap();
        assert!(clock.is_ready());
        clock.schedule_tone(0.0, true, 0.001, 1.0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while clock.is_ready() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!clock.is_ready());
    }

    #[test]
    fn test_midi_note_name() {
        assert_eq!(midi_note_name(60), "C4");
        assert_eq!(midi_note_name(ACCENT_NOTE), "E5");
        assert_eq!(midi_note_name(BEAT_NOTE), "F5");
    }
}
