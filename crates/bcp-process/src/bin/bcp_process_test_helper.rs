//! Child process used by the `bcp-process` integration tests.

use std::{
    env,
    io::{self, Write},
    process, thread,
    time::Duration,
};

fn next_value<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>, flag: &str) -> T {
    let Some(value) = args.next() else {
        eprintln!("missing value for {flag}");
        process::exit(2);
    };
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid value for {flag}: {value}");
        process::exit(2);
    })
}

fn fill(mut writer: impl Write, mut bytes: usize, byte: u8) -> io::Result<()> {
    let buf = [byte; 8 * 1024];
    while bytes > 0 {
        let n = bytes.min(buf.len());
        writer.write_all(&buf[..n])?;
        bytes -= n;
    }
    writer.flush()
}

fn main() {
    let mut args = env::args().skip(1);
    let mut exit_code = 0;
    while let Some(arg) = args.next() {
        let written = match arg.as_str() {
            "--stdout-line" => {
                let line: String = next_value(&mut args, "--stdout-line");
                writeln!(io::stdout().lock(), "{line}")
            }
            "--stderr-line" => {
                let line: String = next_value(&mut args, "--stderr-line");
                writeln!(io::stderr().lock(), "{line}")
            }
            "--stdout-bytes" => fill(io::stdout().lock(), next_value(&mut args, "--stdout-bytes"), b'a'),
            "--print-env" => {
                let key: String = next_value(&mut args, "--print-env");
                let value = env::var(&key).unwrap_or_default();
                writeln!(io::stdout().lock(), "{key}={value}")
            }
            "--sleep-ms" => {
                thread::sleep(Duration::from_millis(next_value(&mut args, "--sleep-ms")));
                Ok(())
            }
            "--exit" => {
                exit_code = next_value(&mut args, "--exit");
                Ok(())
            }
            other => {
                eprintln!("unknown argument: {other}");
                process::exit(2);
            }
        };
        if written.is_err() {
            process::exit(3);
        }
    }
    process::exit(exit_code);
}
