use std::{env, path::PathBuf, process::exit, time::Duration};

use serlink_rs::{
    ConnectionSettings, Notifier, SequenceConfig, SerialService,
    transport::available_ports_with_desc,
};

fn usage() -> ! {
    println!("serlink {}", serlink_rs::version());
    println!("Usage: serlink ports");
    println!("       serlink <port>[:<baud>] <action> [args...]");
    println!("  <action>:");
    println!("    monitor [seconds]: print instrument output (until Ctrl-C if no duration)");
    println!("    send <command>: send one command");
    println!("    batch <interval> <command>...: send commands <interval> seconds apart");
    println!("    script <file> [interval]: play back a command script");
    println!("    measure [repeats] [csv]: run a distortion sweep");
    exit(1);
}

fn seconds(arg: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    Ok(Duration::try_from_secs_f64(arg.parse()?)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() == 2 && args[1] == "ports" {
        for (port, desc) in available_ports_with_desc()? {
            println!("{port}\t{desc}");
        }
        return Ok(());
    }
    if args.len() < 3 {
        usage();
    }

    let (port, baud) = match args[1].split_once(':') {
        Some((port, baud)) => (port, baud.parse()?),
        None => (args[1].as_str(), 115_200),
    };
    let action = args[2].as_str();
    let rest = &args[3..];

    let mut settings = ConnectionSettings::new(port, baud);
    /* Only the monitor wants the loop; everything else reads its own replies */
    settings.auto_read = action == "monitor";

    let (events, mut rx) = Notifier::channel();
    let printer = tokio::spawn(async move {
        while let Some(note) = rx.recv().await {
            println!("[{}] {}", note.source(), note.text());
        }
    });

    let service = SerialService::new(events);
    service.open(settings).await?;

    match action {
        "monitor" => match rest.first() {
            Some(secs) => tokio::time::sleep(seconds(secs)?).await,
            None => tokio::signal::ctrl_c().await?,
        },
        "send" => {
            let Some(command) = rest.first() else { usage() };
            service.send(command).await;
        }
        "batch" => {
            let Some((interval, commands)) = rest.split_first() else {
                usage()
            };
            if service.send_batch(commands.iter().cloned(), seconds(interval)?) {
                service.wait_for_sends().await;
            }
        }
        "script" => {
            let Some(file) = rest.first() else { usage() };
            let interval = match rest.get(1) {
                Some(secs) => seconds(secs)?,
                None => Duration::from_secs(1),
            };
            if service.send_from_file(&PathBuf::from(file), interval).await {
                service.wait_for_sends().await;
            }
        }
        "measure" => {
            let mut config = SequenceConfig::default();
            if let Some(repeats) = rest.first() {
                config.repeats = repeats.parse()?;
            }
            if let Some(csv) = rest.get(1) {
                config.csv_path = Some(PathBuf::from(csv));
            }

            let results = service.run_sequence(&config).await;
            for (idx, value) in results.iter().enumerate() {
                println!(
                    "{} Hz: {value:.6}",
                    serlink_rs::measurement::frequency_at(idx, config.start_hz, config.step_hz)
                );
            }
        }
        _ => {
            println!("Action '{action}' not supported");
            service.close().await;
            exit(1);
        }
    }

    service.close().await;
    drop(service);
    printer.await?;

    Ok(())
}
