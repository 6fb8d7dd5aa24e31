fn main() -> anyhow::Result<()> {
    note_it_down::run()
}
