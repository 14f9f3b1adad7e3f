fn main() -> anyhow::Result<()> {
    opbench::run()
}
