use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
};

use crate::types::{LandmarkSet, NUM_KEYPOINTS};

/// Appends detected hands to a CSV file, one row per hand:
/// `hand_idx,x0,y0,z0,...,x20,y20,z20`.
pub struct LandmarkRecorder<W: Write = BufWriter<File>> {
    out: W,
    rows: u64,
}

fn header() -> String {
    let mut line = String::from("hand_idx");
    for i in 0..NUM_KEYPOINTS {
        line.push_str(&format!(",x{i},y{i},z{i}"));
    }
    line
}

impl LandmarkRecorder {
    /// Opens `path` for appending. The header is written only when the file
    /// is new or empty.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut recorder = Self::from_writer(BufWriter::new(file), false)?;
        if fresh {
            recorder.write_header()?;
        }
        log::info!("recording landmarks to {}", path.display());
        Ok(recorder)
    }
}

impl<W: Write> LandmarkRecorder<W> {
    pub fn from_writer(out: W, with_header: bool) -> io::Result<Self> {
        let mut recorder = Self { out, rows: 0 };
        if with_header {
            recorder.write_header()?;
        }
        Ok(recorder)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", header())
    }

    /// Writes every complete hand in `landmarks`. Returns the number of rows.
    pub fn record(&mut self, landmarks: &LandmarkSet) -> io::Result<usize> {
        let mut written = 0;
        for (idx, hand) in landmarks.hands.iter().enumerate() {
            if !hand.is_complete() {
                continue;
            }
            write!(self.out, "{idx}")?;
            for point in &hand.keypoints {
                write!(self.out, ",{},{},{}", point.x, point.y, point.z)?;
            }
            writeln!(self.out)?;
            written += 1;
        }
        if written > 0 {
            self.out.flush()?;
            self.rows += written as u64;
        }
        Ok(written)
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
