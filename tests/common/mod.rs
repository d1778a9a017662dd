#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

pub const SAMPLE_FIXTURE: &str = "superstore_sample.csv";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Header line shared by the hand-written inputs in the integration tests.
pub const HEADER: &str = "Order ID,Order Date,Ship Date,Ship Mode,Customer ID,Segment,State,Region,Category,Sub-Category,Product Name,Sales,Quantity,Discount,Profit";

/// Builds one data line matching [`HEADER`].
pub fn line(order_id: &str, order_date: &str, region: &str, product: &str, sales: &str, profit: &str) -> String {
    format!(
        "{order_id},{order_date},{order_date},Standard Class,C-{order_id},Consumer,Texas,{region},Office Supplies,Paper,{product},{sales},1,0,{profit}"
    )
}

/// Scratch directory that is removed on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read workspace file")
    }
}
