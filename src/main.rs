use alloc_sampler::Profile;
use anyhow::Context;
use args::Args;
use getopts::Occur;
use glob::glob;

const PROGRAM_DESC: &str = "Visualize alloc_sampler profiles";
const PROGRAM_NAME: &str = "as_print";

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let mut args = Args::new(PROGRAM_NAME, PROGRAM_DESC);
    args.option(
        "d",
        "dir",
        "Directory that stores target profile",
        "DIR",
        Occur::Req,
        None,
    );
    args.option(
        "t",
        "threshold",
        "Hide call sites with less than PCT percent of all samples",
        "PCT",
        Occur::Optional,
        Some(String::from("0")),
    );

    args.parse_from_cli()?;

    let dir: String = args.value_of("dir")?;
    let threshold: f64 = args.value_of("threshold")?;
    let wildcard = format!("{}/alloc_sampler.*", dir);

    // Aggregate per-thread profiles.
    let mut aggregate_profile = Profile::new();
    let mut found = 0;

    for path in glob(wildcard.as_str())? {
        let path = path?;
        eprintln!("found profile in {}", path.display());
        let profile = Profile::load(&path)
            .with_context(|| format!("reading profile {}", path.display()))?;
        aggregate_profile.merge(&profile);
        found += 1;
    }

    if found == 0 {
        anyhow::bail!("no profiles found in {}", dir);
    }

    let mut out = String::new();
    aggregate_profile.fmt_with_threshold(threshold, &mut out)?;
    eprintln!("Aggregate profile:\n{}", out);

    Ok(())
}
