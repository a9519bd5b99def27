pub fn init() {
    use env_logger::{Env, Target};
    use std::fs;
    use std::io;

    // Provisioning runs are one-shot and long; keep a log file when we can,
    // stderr otherwise.
    let target = (|| -> io::Result<Target> {
        fs::create_dir_all("/var/log/livecopy")?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("/var/log/livecopy/livecopy.log")?;
        Ok(Target::Pipe(Box::new(file)))
    })()
    .unwrap_or(Target::Stderr);

    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(target)
        .init();
}
