use procpipe::{Capture, CommandSpec, ExecuteOptions, PlatformLauncherFactory, execute, start};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    info!("Running on {}", PlatformLauncherFactory::platform_name());

    // sh -c "echo hogehoge; echo fuga" | grep h
    let producer = start(
        CommandSpec::builder()
            .program("sh")
            .args(["-c", "echo hogehoge; echo fuga"])
            .build()?,
    )?;
    let mut filter = producer.pipe_to(CommandSpec::new("grep").arg("h"))?;
    let mut stdout = filter.take_stdout().ok_or_else(|| anyhow::anyhow!("stdout taken"))?;

    let (output, outcome) = tokio::join!(stdout.read_to_end(), filter.wait_exit());
    println!("pipeline printed: {}", String::from_utf8_lossy(&output?).trim_end());
    println!("pipeline exited with {}", outcome?);
    filter.dispose().await;

    // one-shot execution with line capture and an input buffer
    let code = execute(
        CommandSpec::new("sort"),
        ExecuteOptions::new()
            .input("pear\napple\nfig\n")
            .stdout(Capture::lines(|line| println!("sorted: {line}"))),
    )
    .await?;
    println!("sort exited with {code}");

    Ok(())
}
