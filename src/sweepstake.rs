//! Sweepstake: Single-file Solana program with an embedded parimutuel
//! settlement engine.
//!
//! Players stake SPL tokens on integer guesses; after the round closes an
//! admin posts the result and cranks the settlement: the winner window is
//! located over an order-statistics multiset of all guesses, balanced in
//! value space, and the losing side of the pool (minus the dividend fee)
//! is split pro-rata between the winning guesses.

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(not(feature = "no-entrypoint"))]
solana_security_txt::security_txt! {
    name: "Sweepstake",
    project_url: "https://github.com/sweepstake-labs/sweepstake-prog",
    contacts: "email:security@sweepstake.bet",
    policy: "https://github.com/sweepstake-labs/sweepstake-prog/blob/master/SECURITY.md"
}

// 1. mod constants
pub mod constants {
    use crate::engine::Game;
    use crate::state::{GameConfig, SlabHeader};
    use core::mem::{align_of, size_of};

    pub const MAGIC: u64 = 0x535745455053544B; // "SWEEPSTK"
    pub const VERSION: u32 = 1;

    pub const HEADER_LEN: usize = size_of::<SlabHeader>();
    pub const CONFIG_LEN: usize = size_of::<GameConfig>();
    pub const ENGINE_ALIGN: usize = align_of::<Game>();

    pub const fn align_up(x: usize, a: usize) -> usize {
        (x + (a - 1)) & !(a - 1)
    }

    pub const ENGINE_OFF: usize = align_up(HEADER_LEN + CONFIG_LEN, ENGINE_ALIGN);
    pub const ENGINE_LEN: usize = size_of::<Game>();
    pub const SLAB_LEN: usize = ENGINE_OFF + ENGINE_LEN;
}

// 2. mod zc (Zero-Copy unsafe island)
#[allow(unsafe_code)]
pub mod zc {
    use crate::constants::{ENGINE_ALIGN, ENGINE_LEN, ENGINE_OFF};
    use crate::engine::Game;
    use solana_program::program_error::ProgramError;

    #[inline]
    pub fn game_ref<'a>(data: &'a [u8]) -> Result<&'a Game, ProgramError> {
        if data.len() < ENGINE_OFF + ENGINE_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let ptr = unsafe { data.as_ptr().add(ENGINE_OFF) };
        if (ptr as usize) % ENGINE_ALIGN != 0 {
            return Err(ProgramError::InvalidAccountData);
        }
        Ok(unsafe { &*(ptr as *const Game) })
    }

    #[inline]
    pub fn game_mut<'a>(data: &'a mut [u8]) -> Result<&'a mut Game, ProgramError> {
        if data.len() < ENGINE_OFF + ENGINE_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        let ptr = unsafe { data.as_mut_ptr().add(ENGINE_OFF) };
        if (ptr as usize) % ENGINE_ALIGN != 0 {
            return Err(ProgramError::InvalidAccountData);
        }
        Ok(unsafe { &mut *(ptr as *mut Game) })
    }
}

// 3. mod error
pub mod error {
    use crate::engine::GameError;
    use num_derive::FromPrimitive;
    use solana_program::program_error::ProgramError;

    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
    pub enum SweepstakeError {
        AlreadyInitialized,
        NotInitialized,
        InvalidVersion,
        InvalidSlabLen,
        InvalidVaultAta,
        InvalidDividendAta,
        InvalidClaimAta,
        InvalidMint,
        ExpectedSigner,
        ExpectedWritable,
        Unauthorized,
        RoundMismatch,
        InvalidSchedule,
        InvalidRoundId,
        MathOverflow,
        // Engine errors mapped:
        GameZeroBetValue,
        GameZeroStake,
        GameBetsClosed,
        GameBetsStillOpen,
        GameZeroResult,
        GameInvalidStage,
        GameTreeFull,
        GameLedgerFull,
        GameRosterFull,
        GameAlreadyClaimed,
        GameNothingToClaim,
        GameOverflow,
    }

    impl From<SweepstakeError> for ProgramError {
        fn from(e: SweepstakeError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    pub fn map_game_error(e: GameError) -> ProgramError {
        let err = match e {
            GameError::ZeroBetValue => SweepstakeError::GameZeroBetValue,
            GameError::ZeroStake => SweepstakeError::GameZeroStake,
            GameError::BetsClosed => SweepstakeError::GameBetsClosed,
            GameError::BetsStillOpen => SweepstakeError::GameBetsStillOpen,
            GameError::ZeroResult => SweepstakeError::GameZeroResult,
            GameError::InvalidStage => SweepstakeError::GameInvalidStage,
            GameError::TreeFull => SweepstakeError::GameTreeFull,
            GameError::LedgerFull => SweepstakeError::GameLedgerFull,
            GameError::RosterFull => SweepstakeError::GameRosterFull,
            GameError::AlreadyClaimed => SweepstakeError::GameAlreadyClaimed,
            GameError::NothingToClaim => SweepstakeError::GameNothingToClaim,
            GameError::Overflow => SweepstakeError::GameOverflow,
        };
        ProgramError::Custom(err as u32)
    }
}

// 4. mod ix
pub mod ix {
    use arrayref::array_ref;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};

    #[derive(Debug)]
    pub enum Instruction {
        /// Create and initialize a round slab.
        InitRound {
            round_id: u64,
            admin: Pubkey,
            start_time: i64,
            round_step: i64,
            close_offset: i64,
        },
        /// Stake `amount` on `value` in the given round (0 = current/next).
        PlaceBet { round_id: u64, value: u64, amount: u64 },
        /// Admin posts the winning value once betting has closed.
        PostResult { value: u64 },
        /// Admin seeds the winner window around the result's rank.
        SeedWindow,
        /// Admin re-balances the window in value space; resumable.
        ShiftWindow { max_steps: u32 },
        /// Admin accumulates the winners' stake sum; resumable; the call
        /// that reaches the window's right bound locks the prize pool and
        /// forwards the dividend fee.
        SettleWinners { start: u64, stop: u64 },
        /// Pay out the prize credited to `user`; tokens go to the caller.
        ClaimPrize { user: Pubkey },
        /// Round authority re-points the dividend fee sink.
        SetDividend { dividend: Pubkey },
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input
                .split_first()
                .ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => {
                    let round_id = read_u64(&mut rest)?;
                    let admin = read_pubkey(&mut rest)?;
                    let start_time = read_i64(&mut rest)?;
                    let round_step = read_i64(&mut rest)?;
                    let close_offset = read_i64(&mut rest)?;
                    Ok(Instruction::InitRound {
                        round_id,
                        admin,
                        start_time,
                        round_step,
                        close_offset,
                    })
                }
                1 => {
                    let round_id = read_u64(&mut rest)?;
                    let value = read_u64(&mut rest)?;
                    let amount = read_u64(&mut rest)?;
                    Ok(Instruction::PlaceBet { round_id, value, amount })
                }
                2 => {
                    let value = read_u64(&mut rest)?;
                    Ok(Instruction::PostResult { value })
                }
                3 => Ok(Instruction::SeedWindow),
                4 => {
                    let max_steps = read_u32(&mut rest)?;
                    Ok(Instruction::ShiftWindow { max_steps })
                }
                5 => {
                    let start = read_u64(&mut rest)?;
                    let stop = read_u64(&mut rest)?;
                    Ok(Instruction::SettleWinners { start, stop })
                }
                6 => {
                    let user = read_pubkey(&mut rest)?;
                    Ok(Instruction::ClaimPrize { user })
                }
                7 => {
                    let dividend = read_pubkey(&mut rest)?;
                    Ok(Instruction::SetDividend { dividend })
                }
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }
    }

    fn read_u32(input: &mut &[u8]) -> Result<u32, ProgramError> {
        if input.len() < 4 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(4);
        *input = rest;
        Ok(u32::from_le_bytes(*array_ref![bytes, 0, 4]))
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        if input.len() < 8 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(u64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_i64(input: &mut &[u8]) -> Result<i64, ProgramError> {
        if input.len() < 8 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(i64::from_le_bytes(*array_ref![bytes, 0, 8]))
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, ProgramError> {
        if input.len() < 32 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        Ok(Pubkey::new_from_array(*array_ref![bytes, 0, 32]))
    }
}

// 5. mod accounts
pub mod accounts {
    use crate::error::SweepstakeError;
    use solana_program::{
        account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey,
    };

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(SweepstakeError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(SweepstakeError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(())
    }

    pub fn derive_vault_authority(program_id: &Pubkey, slab_key: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[b"vault", slab_key.as_ref()], program_id)
    }
}

// 6. mod state
pub mod state {
    use crate::constants::{CONFIG_LEN, HEADER_LEN};
    use crate::error::SweepstakeError;
    use bytemuck::{Pod, Zeroable};
    use core::cell::RefMut;
    use solana_program::account_info::AccountInfo;
    use solana_program::program_error::ProgramError;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct SlabHeader {
        pub magic: u64,
        pub version: u32,
        pub bump: u8,
        pub _padding: [u8; 3],
        /// Round authority: may re-point the dividend sink.
        pub authority: [u8; 32],
        pub _reserved: [u8; 16],
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct GameConfig {
        /// Settlement admin: posts the result and cranks the window.
        pub admin: [u8; 32],
        pub stake_mint: [u8; 32],
        pub vault_pubkey: [u8; 32],
        pub dividend_pubkey: [u8; 32],
        pub start_time: i64,
        pub round_step: i64,
        pub close_offset: i64,
        pub vault_authority_bump: u8,
        pub _padding: [u8; 7],
    }

    impl GameConfig {
        /// Betting for `round_id` closes at `start + step * id - offset`.
        pub fn close_timestamp(&self, round_id: u64) -> Result<i64, ProgramError> {
            self.round_step
                .checked_mul(round_id as i64)
                .and_then(|t| t.checked_add(self.start_time))
                .and_then(|t| t.checked_sub(self.close_offset))
                .ok_or_else(|| SweepstakeError::MathOverflow.into())
        }

        pub fn current_round_id(&self, now: i64) -> u64 {
            if self.round_step <= 0 || now <= self.start_time {
                return 1;
            }
            ((now - self.start_time) / self.round_step) as u64 + 1
        }

        /// Round id 0 resolves to the round a bet placed right now belongs
        /// to: the current round, or the next one once betting has closed.
        pub fn resolve_round_id(&self, requested: u64, now: i64) -> Result<u64, ProgramError> {
            if requested != 0 {
                return Ok(requested);
            }
            let current = self.current_round_id(now);
            if now >= self.close_timestamp(current)? {
                Ok(current + 1)
            } else {
                Ok(current)
            }
        }
    }

    pub fn slab_data_mut<'a, 'b>(
        ai: &'b AccountInfo<'a>,
    ) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        Ok(ai.try_borrow_mut_data()?)
    }

    pub fn read_header(data: &[u8]) -> SlabHeader {
        let mut h = SlabHeader::zeroed();
        let src = &data[..HEADER_LEN];
        let dst = bytemuck::bytes_of_mut(&mut h);
        dst.copy_from_slice(src);
        h
    }

    pub fn write_header(data: &mut [u8], h: &SlabHeader) {
        let src = bytemuck::bytes_of(h);
        let dst = &mut data[..HEADER_LEN];
        dst.copy_from_slice(src);
    }

    pub fn read_config(data: &[u8]) -> GameConfig {
        let mut c = GameConfig::zeroed();
        let src = &data[HEADER_LEN..HEADER_LEN + CONFIG_LEN];
        let dst = bytemuck::bytes_of_mut(&mut c);
        dst.copy_from_slice(src);
        c
    }

    pub fn write_config(data: &mut [u8], c: &GameConfig) {
        let src = bytemuck::bytes_of(c);
        let dst = &mut data[HEADER_LEN..HEADER_LEN + CONFIG_LEN];
        dst.copy_from_slice(src);
    }
}

// 7. mod engine (order-statistics multiset + round state + settlement)
pub mod engine {
    use bytemuck::{Pod, Zeroable};

    /// Distinct bet values per round, including the virtual-root slot.
    #[cfg(not(feature = "test"))]
    pub const MAX_NODES: usize = 512;
    #[cfg(feature = "test")]
    pub const MAX_NODES: usize = 64;

    /// Distinct `(user, value)` stake ledger entries per round.
    #[cfg(not(feature = "test"))]
    pub const MAX_STAKES: usize = 1024;
    #[cfg(feature = "test")]
    pub const MAX_STAKES: usize = 128;

    /// Distinct bettors per round.
    #[cfg(not(feature = "test"))]
    pub const MAX_USERS: usize = 512;
    #[cfg(feature = "test")]
    pub const MAX_USERS: usize = 64;

    /// Fields this small settle through the nearest-neighbour rule.
    pub const SMALL_FIELD_LIMIT: u64 = 19;
    /// Winner quota for large fields, percent of all occurrences.
    pub const WINNER_QUOTA_PCT: u64 = 10;
    /// Dividend fee, percent of the losing side of the pool.
    pub const FEE_PCT: u64 = 10;
    /// Window slide iterations per crank when the caller passes 0.
    pub const DEFAULT_SHIFT_STEPS: u32 = 32;

    pub const NIL: u16 = 0;
    const LEFT: u8 = 0;
    const RIGHT: u8 = 1;

    const HEADING_NONE: u8 = 0;
    const HEADING_RIGHT: u8 = 1;
    const HEADING_LEFT: u8 = 2;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum GameError {
        ZeroBetValue,
        ZeroStake,
        BetsClosed,
        BetsStillOpen,
        ZeroResult,
        InvalidStage,
        TreeFull,
        LedgerFull,
        RosterFull,
        AlreadyClaimed,
        NothingToClaim,
        Overflow,
    }

    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Stage {
        Open = 0,
        ResultSet = 1,
        WindowSeeded = 2,
        WindowShifted = 3,
        Finalized = 4,
    }

    /// One node per distinct non-zero bet value. Slot 0 doubles as the
    /// virtual root (its right child is the real root), the nil sentinel
    /// (height 0, subtree count 0), and the bucket counting zero-valued
    /// insertions.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct AvlNode {
        pub value: u64,
        /// Occurrences of `value` beyond the first insertion.
        pub duplicates: u32,
        /// Occurrences in this subtree: self + duplicates + children.
        pub subtree_count: u32,
        pub left: u16,
        pub right: u16,
        pub parent: u16,
        /// Which child slot of `parent` this node occupies.
        pub side: u8,
        pub height: u8,
    }

    /// Augmented AVL multiset over bet values, arena-allocated inside the
    /// slab. Nodes are addressed by `u16` handles; nothing is ever freed.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct BetTree {
        pub nodes: [AvlNode; MAX_NODES],
        pub len: u32,
        _pad: u32,
    }

    impl BetTree {
        pub fn init(&mut self) {
            self.len = 1; // slot 0 is the virtual root
        }

        pub fn is_empty(&self) -> bool {
            self.nodes[0].right == NIL
        }

        /// Total occurrences in the multiset, zero bucket included.
        pub fn count(&self) -> u64 {
            let root = self.nodes[0].right;
            self.nodes[0].duplicates as u64 + self.nodes[root as usize].subtree_count as u64
        }

        /// Add one occurrence of `value`. Duplicates only bump counters;
        /// a new key is attached as a leaf and rebalanced with at most one
        /// rotation.
        pub fn insert(&mut self, value: u64) -> Result<(), GameError> {
            if value == 0 {
                // zero is not a real key; it lands in the reserved bucket
                self.nodes[0].duplicates = self.nodes[0]
                    .duplicates
                    .checked_add(1)
                    .ok_or(GameError::Overflow)?;
                return Ok(());
            }
            if self.is_empty() {
                let idx = self.alloc(value)?;
                self.nodes[0].right = idx;
                self.nodes[idx as usize].parent = 0;
                self.nodes[idx as usize].side = RIGHT;
                return Ok(());
            }
            let mut cur = self.nodes[0].right;
            loop {
                let cv = self.nodes[cur as usize].value;
                if value == cv {
                    self.nodes[cur as usize].duplicates = self.nodes[cur as usize]
                        .duplicates
                        .checked_add(1)
                        .ok_or(GameError::Overflow)?;
                    self.bump_counts(cur);
                    return Ok(());
                }
                let go_right = value >= cv;
                let next = if go_right {
                    self.nodes[cur as usize].right
                } else {
                    self.nodes[cur as usize].left
                };
                if next == NIL {
                    let idx = self.alloc(value)?;
                    if go_right {
                        self.nodes[cur as usize].right = idx;
                    } else {
                        self.nodes[cur as usize].left = idx;
                    }
                    self.nodes[idx as usize].parent = cur;
                    self.nodes[idx as usize].side = if go_right { RIGHT } else { LEFT };
                    self.bump_counts(cur);
                    self.rebalance(idx);
                    return Ok(());
                }
                cur = next;
            }
        }

        /// Value at 0-based occurrence rank `rank`; 0 when out of range.
        pub fn select(&self, rank: u64) -> u64 {
            let zeros = self.nodes[0].duplicates as u64;
            if rank < zeros {
                return 0;
            }
            let mut rank = rank - zeros;
            let mut cur = self.nodes[0].right;
            while cur != NIL {
                let (left, right, dups, value) = {
                    let n = &self.nodes[cur as usize];
                    (n.left, n.right, n.duplicates as u64, n.value)
                };
                let left_count = self.nodes[left as usize].subtree_count as u64;
                if rank < left_count {
                    cur = left;
                    continue;
                }
                let here = dups + 1;
                if rank < left_count + here {
                    return value;
                }
                rank -= left_count + here;
                cur = right;
            }
            0
        }

        /// Last rank at which `value` occurs; 0 when absent or empty.
        /// Ranks, not keys, are what settlement reasons about, so this is
        /// a binary search over `select` rather than a tree descent.
        pub fn position(&self, value: u64) -> u64 {
            let total = self.count();
            if total == 0 {
                return 0;
            }
            if value < self.select(0) || value > self.select(total - 1) {
                return 0;
            }
            let (mut lo, mut hi) = (0u64, total - 1);
            while lo < hi {
                let mid = lo + (hi - lo + 1) / 2;
                if self.select(mid) <= value {
                    lo = mid;
                } else {
                    hi = mid - 1;
                }
            }
            if self.select(lo) == value {
                lo
            } else {
                0
            }
        }

        pub fn find(&self, value: u64) -> Option<&AvlNode> {
            let mut cur = self.nodes[0].right;
            while cur != NIL {
                let n = &self.nodes[cur as usize];
                if value == n.value {
                    return Some(n);
                }
                cur = if value < n.value { n.left } else { n.right };
            }
            None
        }

        /// Occurrences of `value`, duplicates included; 0 when absent.
        pub fn occurrences(&self, value: u64) -> u64 {
            self.find(value).map(|n| n.duplicates as u64 + 1).unwrap_or(0)
        }

        fn alloc(&mut self, value: u64) -> Result<u16, GameError> {
            let idx = self.len as usize;
            if idx >= MAX_NODES {
                return Err(GameError::TreeFull);
            }
            self.len += 1;
            self.nodes[idx] = AvlNode {
                value,
                duplicates: 0,
                subtree_count: 1,
                left: NIL,
                right: NIL,
                parent: NIL,
                side: LEFT,
                height: 1,
            };
            Ok(idx as u16)
        }

        // One new occurrence below `from`: refresh subtree counts up to
        // the virtual root. Counts are bounded by the ledger capacity.
        fn bump_counts(&mut self, mut from: u16) {
            while from != NIL {
                self.nodes[from as usize].subtree_count += 1;
                from = self.nodes[from as usize].parent;
            }
        }

        fn height(&self, i: u16) -> u8 {
            self.nodes[i as usize].height
        }

        fn balance(&self, i: u16) -> i16 {
            let n = &self.nodes[i as usize];
            self.height(n.left) as i16 - self.height(n.right) as i16
        }

        fn refresh(&mut self, i: u16) {
            let (l, r) = {
                let n = &self.nodes[i as usize];
                (n.left, n.right)
            };
            let h = 1 + core::cmp::max(self.height(l), self.height(r));
            let c = 1
                + self.nodes[i as usize].duplicates
                + self.nodes[l as usize].subtree_count
                + self.nodes[r as usize].subtree_count;
            let n = &mut self.nodes[i as usize];
            n.height = h;
            n.subtree_count = c;
        }

        // Walk parent-ward from the freshly attached leaf. A balance
        // factor of 0 means the subtree height is unchanged and the walk
        // can stop; one rotation always restores the AVL bound.
        fn rebalance(&mut self, inserted: u16) {
            let mut node = self.nodes[inserted as usize].parent;
            while node != NIL {
                let (l, r) = {
                    let n = &self.nodes[node as usize];
                    (n.left, n.right)
                };
                let h = 1 + core::cmp::max(self.height(l), self.height(r));
                self.nodes[node as usize].height = h;
                let bf = self.balance(node);
                if bf == 0 {
                    break;
                }
                if bf > 1 || bf < -1 {
                    self.rotate_heavy(node, bf);
                    break;
                }
                node = self.nodes[node as usize].parent;
            }
        }

        fn rotate_heavy(&mut self, node: u16, bf: i16) {
            if bf > 0 {
                let l = self.nodes[node as usize].left;
                if self.balance(l) < 0 {
                    self.rotate(l, LEFT);
                }
                self.rotate(node, RIGHT);
            } else {
                let r = self.nodes[node as usize].right;
                if self.balance(r) > 0 {
                    self.rotate(r, RIGHT);
                }
                self.rotate(node, LEFT);
            }
        }

        // Rotate `n` down in direction `dir`; its child on the opposite
        // side becomes the subtree root. Exactly `n` and the pivot change
        // shape, so only those two are refreshed.
        fn rotate(&mut self, n: u16, dir: u8) {
            let parent = self.nodes[n as usize].parent;
            let n_side = self.nodes[n as usize].side;
            let (pivot, orphan) = if dir == RIGHT {
                let p = self.nodes[n as usize].left;
                (p, self.nodes[p as usize].right)
            } else {
                let p = self.nodes[n as usize].right;
                (p, self.nodes[p as usize].left)
            };

            // the orphan subtree swaps over to `n`'s vacated side
            if dir == RIGHT {
                self.nodes[n as usize].left = orphan;
            } else {
                self.nodes[n as usize].right = orphan;
            }
            if orphan != NIL {
                self.nodes[orphan as usize].parent = n;
                self.nodes[orphan as usize].side = if dir == RIGHT { LEFT } else { RIGHT };
            }

            // the pivot takes `n`'s slot under the old parent; when `n`
            // was the real root that slot is the virtual root's right
            self.nodes[pivot as usize].parent = parent;
            self.nodes[pivot as usize].side = n_side;
            if n_side == LEFT {
                self.nodes[parent as usize].left = pivot;
            } else {
                self.nodes[parent as usize].right = pivot;
            }

            if dir == RIGHT {
                self.nodes[pivot as usize].right = n;
                self.nodes[n as usize].side = RIGHT;
            } else {
                self.nodes[pivot as usize].left = n;
                self.nodes[n as usize].side = LEFT;
            }
            self.nodes[n as usize].parent = pivot;

            self.refresh(n);
            self.refresh(pivot);
        }
    }

    /// One `(user, value)` cumulative stake.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct StakeEntry {
        pub owner: [u8; 32],
        pub value: u64,
        pub amount: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Pod, Zeroable)]
    pub struct UserSlot {
        pub owner: [u8; 32],
        pub claimed: u8,
        pub _pad: [u8; 7],
    }

    /// Per-round settlement state, stored zero-copy in the slab.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct Game {
        pub round_id: u64,
        pub close_time: i64,
        pub total_amount: u64,
        pub result: u64,
        /// First rank of the result's duplicate block, cached at insertion.
        pub result_rank: u64,
        pub window_left: u64,
        pub window_right: u64,
        /// Bet values at the window edges; ranks drift as the window
        /// slides, values are what payouts are judged against.
        pub window_left_value: u64,
        pub window_right_value: u64,
        pub winners_stake_sum: u64,
        pub prize_pool: u64,
        pub fee_amount: u64,
        /// Next unprocessed rank for the resumable winners sum.
        pub winners_cursor: u64,
        pub n_stakes: u32,
        pub n_users: u32,
        pub stage: u8,
        shift_heading: u8,
        pub _pad: [u8; 6],
        pub tree: BetTree,
        pub stakes: [StakeEntry; MAX_STAKES],
        pub users: [UserSlot; MAX_USERS],
    }

    impl Game {
        /// The slab bytes must already be zeroed.
        pub fn init(&mut self, round_id: u64, close_time: i64) {
            self.round_id = round_id;
            self.close_time = close_time;
            self.tree.init();
        }

        pub fn stage(&self) -> Stage {
            match self.stage {
                1 => Stage::ResultSet,
                2 => Stage::WindowSeeded,
                3 => Stage::WindowShifted,
                4 => Stage::Finalized,
                _ => Stage::Open,
            }
        }

        fn set_stage(&mut self, s: Stage) {
            self.stage = s as u8;
        }

        /// Record a stake on `value`. The first stake a user places at a
        /// value adds one occurrence to the multiset; repeats only grow
        /// the ledger amount.
        pub fn place_bet(
            &mut self,
            owner: [u8; 32],
            value: u64,
            amount: u64,
            now: i64,
        ) -> Result<(), GameError> {
            if value == 0 {
                return Err(GameError::ZeroBetValue);
            }
            if amount == 0 {
                return Err(GameError::ZeroStake);
            }
            if self.stage() != Stage::Open {
                return Err(GameError::InvalidStage);
            }
            if now >= self.close_time {
                return Err(GameError::BetsClosed);
            }
            self.register_user(owner)?;
            match self.find_stake(&owner, value) {
                Some(i) => {
                    let e = &mut self.stakes[i];
                    e.amount = e.amount.checked_add(amount).ok_or(GameError::Overflow)?;
                }
                None => {
                    if self.n_stakes as usize >= MAX_STAKES {
                        return Err(GameError::LedgerFull);
                    }
                    // keep one arena slot free so the result can always
                    // be inserted after the close
                    if self.tree.len as usize >= MAX_NODES - 1
                        && self.tree.find(value).is_none()
                    {
                        return Err(GameError::TreeFull);
                    }
                    self.tree.insert(value)?;
                    let i = self.n_stakes as usize;
                    self.stakes[i] = StakeEntry { owner, value, amount };
                    self.n_stakes += 1;
                }
            }
            self.total_amount = self
                .total_amount
                .checked_add(amount)
                .ok_or(GameError::Overflow)?;
            Ok(())
        }

        /// Post the winning value. The result competes as a synthetic
        /// occurrence in the multiset; its rank is cached immediately.
        pub fn insert_result(&mut self, value: u64, now: i64) -> Result<(), GameError> {
            if self.stage() != Stage::Open {
                return Err(GameError::InvalidStage);
            }
            if value == 0 {
                return Err(GameError::ZeroResult);
            }
            if now < self.close_time {
                return Err(GameError::BetsStillOpen);
            }
            self.tree.insert(value)?;
            self.result = value;
            let dups = self.tree.find(value).map(|n| n.duplicates as u64).unwrap_or(0);
            self.result_rank = self.tree.position(value).saturating_sub(dups);
            self.set_stage(Stage::ResultSet);
            Ok(())
        }

        /// Locate the initial winner window around the result's rank.
        pub fn seed_window(&mut self) -> Result<(), GameError> {
            if self.stage() != Stage::ResultSet {
                return Err(GameError::InvalidStage);
            }
            let total = self.tree.count();
            let last = total - 1;
            let r = self.result_rank;
            let dups = self
                .tree
                .find(self.result)
                .map(|n| n.duplicates as u64)
                .unwrap_or(0);

            let (left, right) = if dups > 1 {
                // at least two tickets sit exactly on the result: jackpot,
                // the exact matches take it all
                (r, r)
            } else if total < 2 {
                // only the result itself is in the multiset
                (r, r)
            } else if last < SMALL_FIELD_LIMIT {
                // nearest neighbour in value space wins outright; an exact
                // distance tie pays both sides
                if r == 0 {
                    (1, 1)
                } else if r >= last {
                    (last - 1, last - 1)
                } else {
                    let lv = self.tree.select(r - 1);
                    let rv = self.tree.select(r + 1);
                    let dl = self.result.abs_diff(lv);
                    let dr = rv.abs_diff(self.result);
                    if dl < dr {
                        (r - 1, r - 1)
                    } else if dr < dl {
                        (r + 1, r + 1)
                    } else {
                        (r - 1, r + 1)
                    }
                }
            } else {
                let target = total * WINNER_QUOTA_PCT / 100;
                let half = target / 2;
                let width = half * 2;
                // centered on the result, slid inward at the rank bounds
                let mut left = r.saturating_sub(half);
                let mut right = left + width;
                if right > last {
                    right = last;
                    left = last.saturating_sub(width);
                }
                (left, right)
            };

            // rank -> value -> rank round-trip pins each edge to its
            // duplicate block's canonical boundary
            self.window_left_value = self.tree.select(left);
            self.window_right_value = self.tree.select(right);
            self.window_left = self.tree.position(self.window_left_value);
            self.window_right = self.tree.position(self.window_right_value);
            self.shift_heading = HEADING_NONE;
            self.set_stage(Stage::WindowSeeded);
            Ok(())
        }

        /// Slide the window, one duplicate block per step, toward the edge
        /// with the smaller value-distance to the result, until the two
        /// distances agree or an edge runs out of room. Runs at most
        /// `max_steps` iterations (a default budget when 0) and reports
        /// whether the window has settled; call again to continue.
        pub fn shift_window(&mut self, max_steps: u32) -> Result<bool, GameError> {
            match self.stage() {
                Stage::WindowSeeded => {}
                Stage::WindowShifted => return Ok(true),
                _ => return Err(GameError::InvalidStage),
            }
            let budget = if max_steps == 0 { DEFAULT_SHIFT_STEPS } else { max_steps };
            let last = self.tree.count() - 1;
            let mut steps = 0u32;
            while steps < budget {
                let dl = self.result.abs_diff(self.window_left_value);
                let dr = self.window_right_value.abs_diff(self.result);
                if dl == dr {
                    self.set_stage(Stage::WindowShifted);
                    return Ok(true);
                }
                if dl > dr {
                    // the right edge sits nearer in value space: grow it
                    // outward and draw the left edge in
                    let grow = self.block_end(self.window_right_value) + 1;
                    let draw = self.block_end(self.window_left_value) + 1;
                    if grow > last
                        || draw > self.result_rank
                        || self.shift_heading == HEADING_LEFT
                    {
                        self.set_stage(Stage::WindowShifted);
                        return Ok(true);
                    }
                    self.shift_heading = HEADING_RIGHT;
                    self.window_right_value = self.tree.select(grow);
                    self.window_right = self.tree.position(self.window_right_value);
                    self.window_left_value = self.tree.select(draw);
                    self.window_left = self.tree.position(self.window_left_value);
                } else {
                    let left_first = self.block_first(self.window_left_value);
                    let right_first = self.block_first(self.window_right_value);
                    if left_first == 0
                        || right_first == 0
                        || right_first - 1 < self.result_rank
                        || self.shift_heading == HEADING_RIGHT
                    {
                        self.set_stage(Stage::WindowShifted);
                        return Ok(true);
                    }
                    self.shift_heading = HEADING_LEFT;
                    self.window_left_value = self.tree.select(left_first - 1);
                    self.window_left = self.tree.position(self.window_left_value);
                    self.window_right_value = self.tree.select(right_first - 1);
                    self.window_right = self.tree.position(self.window_right_value);
                }
                steps += 1;
            }
            Ok(false)
        }

        /// Accumulate the winners' stake sum over `[start, stop]` (zeroes
        /// mean: resume from the cursor, run to the window's right bound).
        /// The call that processes the right bound locks the pool and
        /// returns the dividend fee to forward.
        pub fn settle_winners(
            &mut self,
            start: u64,
            stop: u64,
        ) -> Result<Option<u64>, GameError> {
            match self.stage() {
                Stage::WindowShifted => {}
                Stage::Finalized => return Ok(None),
                _ => return Err(GameError::InvalidStage),
            }
            let begin = if start == 0 {
                core::cmp::max(self.winners_cursor, self.window_left)
            } else {
                start
            };
            let end = if stop == 0 {
                self.window_right
            } else {
                core::cmp::min(stop, self.window_right)
            };
            let mut rank = begin;
            while rank <= end {
                let value = self.tree.select(rank);
                // the result's own occurrence carries no ledger stake, so
                // block sums exclude it by construction
                let staked = self.stake_sum_at(value);
                self.winners_stake_sum = self
                    .winners_stake_sum
                    .checked_add(staked)
                    .ok_or(GameError::Overflow)?;
                let next = self.tree.position(value) + 1;
                if next <= rank {
                    break;
                }
                rank = next;
            }
            self.winners_cursor = rank;
            if rank > self.window_right {
                // losers fund the prize: fee and pool come out of the
                // non-winning side of the book
                let profit = self
                    .total_amount
                    .checked_sub(self.winners_stake_sum)
                    .ok_or(GameError::Overflow)?;
                let fee = profit.checked_mul(FEE_PCT).ok_or(GameError::Overflow)? / 100;
                self.fee_amount = fee;
                self.prize_pool = profit - fee;
                self.set_stage(Stage::Finalized);
                return Ok(Some(fee));
            }
            Ok(None)
        }

        /// Pending prize for `owner`: 0 when unfinalized, already claimed,
        /// or not a winner.
        pub fn check_prize(&self, owner: &[u8; 32]) -> u64 {
            if self.stage() != Stage::Finalized || self.winners_stake_sum == 0 {
                return 0;
            }
            if self.has_claimed(owner) {
                return 0;
            }
            self.scaled_share(self.winning_stake(owner))
        }

        /// Mark `owner` claimed and return the payout amount. The token
        /// transfer is the caller's job and must come after this commits.
        pub fn claim_prize(&mut self, owner: [u8; 32]) -> Result<u64, GameError> {
            if self.stage() != Stage::Finalized {
                return Err(GameError::InvalidStage);
            }
            let slot = self.users[..self.n_users as usize]
                .iter()
                .position(|u| u.owner == owner)
                .ok_or(GameError::NothingToClaim)?;
            if self.users[slot].claimed != 0 {
                return Err(GameError::AlreadyClaimed);
            }
            if self.winners_stake_sum == 0 {
                return Err(GameError::NothingToClaim);
            }
            let amount = self.scaled_share(self.winning_stake(&owner));
            if amount == 0 {
                return Err(GameError::NothingToClaim);
            }
            self.users[slot].claimed = 1;
            Ok(amount)
        }

        /// Sum of `owner`'s stakes on values inside the settled window.
        pub fn winning_stake(&self, owner: &[u8; 32]) -> u64 {
            let mut sum = 0u64;
            for e in self.stakes[..self.n_stakes as usize].iter() {
                if e.owner == *owner
                    && e.value >= self.window_left_value
                    && e.value <= self.window_right_value
                {
                    sum += e.amount;
                }
            }
            sum
        }

        pub fn has_claimed(&self, owner: &[u8; 32]) -> bool {
            self.users[..self.n_users as usize]
                .iter()
                .any(|u| u.owner == *owner && u.claimed != 0)
        }

        pub fn stake_of(&self, owner: &[u8; 32], value: u64) -> u64 {
            self.find_stake(owner, value)
                .map(|i| self.stakes[i].amount)
                .unwrap_or(0)
        }

        /// Distinct values `owner` has bet on, in placement order.
        pub fn user_values<'a>(&'a self, owner: &'a [u8; 32]) -> impl Iterator<Item = u64> + 'a {
            self.stakes[..self.n_stakes as usize]
                .iter()
                .filter(move |e| e.owner == *owner)
                .map(|e| e.value)
        }

        fn scaled_share(&self, stake: u64) -> u64 {
            // stake <= winners_stake_sum, so the quotient fits in u64
            ((self.prize_pool as u128) * (stake as u128) / (self.winners_stake_sum as u128))
                as u64
        }

        fn stake_sum_at(&self, value: u64) -> u64 {
            let mut sum = 0u64;
            for e in self.stakes[..self.n_stakes as usize].iter() {
                if e.value == value {
                    sum += e.amount;
                }
            }
            sum
        }

        fn find_stake(&self, owner: &[u8; 32], value: u64) -> Option<usize> {
            self.stakes[..self.n_stakes as usize]
                .iter()
                .position(|e| e.owner == *owner && e.value == value)
        }

        fn register_user(&mut self, owner: [u8; 32]) -> Result<(), GameError> {
            if self.users[..self.n_users as usize]
                .iter()
                .any(|u| u.owner == owner)
            {
                return Ok(());
            }
            if self.n_users as usize >= MAX_USERS {
                return Err(GameError::RosterFull);
            }
            let i = self.n_users as usize;
            self.users[i] = UserSlot { owner, claimed: 0, _pad: [0; 7] };
            self.n_users += 1;
            Ok(())
        }

        // Last rank of the duplicate block holding `value`.
        fn block_end(&self, value: u64) -> u64 {
            self.tree.position(value)
        }

        // First rank of the duplicate block holding `value`.
        fn block_first(&self, value: u64) -> u64 {
            let occ = self.tree.occurrences(value);
            (self.tree.position(value) + 1).saturating_sub(occ)
        }
    }
}

// 8. mod vault (stake custody)
pub mod vault {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError};

    #[cfg(not(test))]
    use solana_program::program::{invoke, invoke_signed};

    #[cfg(test)]
    use solana_program::program_pack::Pack;
    #[cfg(test)]
    use spl_token::state::Account as TokenAccount;

    pub fn deposit_stake<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        _authority: &AccountInfo<'a>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                dest.key,
                _authority.key,
                &[],
                amount,
            )?;
            invoke(
                &ix,
                &[
                    source.clone(),
                    dest.clone(),
                    _authority.clone(),
                    _token_program.clone(),
                ],
            )
        }
        #[cfg(test)]
        {
            let mut src_data = source.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(amount)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;

            let mut dst_data = dest.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state
                .amount
                .checked_add(amount)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            Ok(())
        }
    }

    pub fn pay_out<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        _authority: &AccountInfo<'a>,
        amount: u64,
        _signer_seeds: &[&[&[u8]]],
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                dest.key,
                _authority.key,
                &[],
                amount,
            )?;
            invoke_signed(
                &ix,
                &[
                    source.clone(),
                    dest.clone(),
                    _authority.clone(),
                    _token_program.clone(),
                ],
                _signer_seeds,
            )
        }
        #[cfg(test)]
        {
            let mut src_data = source.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(amount)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;

            let mut dst_data = dest.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state
                .amount
                .checked_add(amount)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            Ok(())
        }
    }
}

// 9. mod processor
pub mod processor {
    use crate::{
        accounts,
        constants::{MAGIC, SLAB_LEN, VERSION},
        error::{map_game_error, SweepstakeError},
        ix::Instruction,
        state::{self, GameConfig, SlabHeader},
        vault, zc,
    };
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        log::sol_log_64,
        msg,
        program_error::ProgramError,
        program_pack::Pack,
        pubkey::Pubkey,
        sysvar::{clock::Clock, Sysvar},
    };

    fn slab_guard(
        program_id: &Pubkey,
        slab: &AccountInfo,
        data: &[u8],
    ) -> Result<(), ProgramError> {
        accounts::expect_owner(slab, program_id)?;
        if data.len() != SLAB_LEN {
            return Err(SweepstakeError::InvalidSlabLen.into());
        }
        Ok(())
    }

    fn require_initialized(data: &[u8]) -> Result<(), ProgramError> {
        let h = state::read_header(data);
        if h.magic != MAGIC {
            return Err(SweepstakeError::NotInitialized.into());
        }
        if h.version != VERSION {
            return Err(SweepstakeError::InvalidVersion.into());
        }
        Ok(())
    }

    fn require_admin(config: &GameConfig, signer: &AccountInfo) -> Result<(), ProgramError> {
        accounts::expect_signer(signer)?;
        if Pubkey::new_from_array(config.admin) != *signer.key {
            return Err(SweepstakeError::Unauthorized.into());
        }
        Ok(())
    }

    fn verify_token_account(
        ai: &AccountInfo,
        expected_mint: &Pubkey,
        bad: SweepstakeError,
    ) -> Result<spl_token::state::Account, ProgramError> {
        if ai.owner != &spl_token::ID {
            return Err(bad.into());
        }
        if ai.data_len() != spl_token::state::Account::LEN {
            return Err(bad.into());
        }
        let data = ai.try_borrow_data()?;
        let tok = spl_token::state::Account::unpack(&data)?;
        if tok.mint != *expected_mint {
            return Err(SweepstakeError::InvalidMint.into());
        }
        Ok(tok)
    }

    fn verify_vault(
        a_vault: &AccountInfo,
        expected_owner: &Pubkey,
        expected_mint: &Pubkey,
        expected_pubkey: &Pubkey,
    ) -> Result<(), ProgramError> {
        if a_vault.key != expected_pubkey {
            return Err(SweepstakeError::InvalidVaultAta.into());
        }
        let tok = verify_token_account(a_vault, expected_mint, SweepstakeError::InvalidVaultAta)?;
        if tok.owner != *expected_owner {
            return Err(SweepstakeError::InvalidVaultAta.into());
        }
        Ok(())
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::InitRound {
                round_id,
                admin,
                start_time,
                round_step,
                close_offset,
            } => {
                accounts::expect_len(accounts, 6)?;
                let a_authority = &accounts[0];
                let a_slab = &accounts[1];
                let a_mint = &accounts[2];
                let a_vault = &accounts[3];
                let a_dividend = &accounts[4];
                let a_clock = &accounts[5];

                accounts::expect_signer(a_authority)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;

                let header = state::read_header(&data);
                if header.magic == MAGIC {
                    return Err(SweepstakeError::AlreadyInitialized.into());
                }

                if round_step <= 0 || close_offset < 0 || close_offset >= round_step {
                    return Err(SweepstakeError::InvalidSchedule.into());
                }

                let (auth, bump) = accounts::derive_vault_authority(program_id, a_slab.key);
                verify_vault(a_vault, &auth, a_mint.key, a_vault.key)?;
                verify_token_account(a_dividend, a_mint.key, SweepstakeError::InvalidDividendAta)?;

                let config = GameConfig {
                    admin: admin.to_bytes(),
                    stake_mint: a_mint.key.to_bytes(),
                    vault_pubkey: a_vault.key.to_bytes(),
                    dividend_pubkey: a_dividend.key.to_bytes(),
                    start_time,
                    round_step,
                    close_offset,
                    vault_authority_bump: bump,
                    _padding: [0; 7],
                };

                let clock = Clock::from_account_info(a_clock)?;
                let now = clock.unix_timestamp;
                let resolved = config.resolve_round_id(round_id, now)?;
                let close_time = config.close_timestamp(resolved)?;
                if now >= close_time {
                    return Err(SweepstakeError::InvalidRoundId.into());
                }

                for b in data.iter_mut() {
                    *b = 0;
                }

                let game = zc::game_mut(&mut data)?;
                game.init(resolved, close_time);

                state::write_config(&mut data, &config);
                let new_header = SlabHeader {
                    magic: MAGIC,
                    version: VERSION,
                    bump,
                    _padding: [0; 3],
                    authority: a_authority.key.to_bytes(),
                    _reserved: [0; 16],
                };
                state::write_header(&mut data, &new_header);

                msg!("round open");
                sol_log_64(resolved, close_time as u64, 0, 0, 0);
            }
            Instruction::PlaceBet { round_id, value, amount } => {
                accounts::expect_len(accounts, 6)?;
                let a_bettor = &accounts[0];
                let a_slab = &accounts[1];
                let a_bettor_ata = &accounts[2];
                let a_vault = &accounts[3];
                let a_token = &accounts[4];
                let a_clock = &accounts[5];

                accounts::expect_signer(a_bettor)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                let (auth, _) = accounts::derive_vault_authority(program_id, a_slab.key);
                verify_vault(
                    a_vault,
                    &auth,
                    &Pubkey::new_from_array(config.stake_mint),
                    &Pubkey::new_from_array(config.vault_pubkey),
                )?;

                let clock = Clock::from_account_info(a_clock)?;
                let now = clock.unix_timestamp;

                let game = zc::game_mut(&mut data)?;
                let resolved = config.resolve_round_id(round_id, now)?;
                if resolved != game.round_id {
                    return Err(SweepstakeError::RoundMismatch.into());
                }

                game.place_bet(a_bettor.key.to_bytes(), value, amount, now)
                    .map_err(map_game_error)?;

                vault::deposit_stake(a_token, a_bettor_ata, a_vault, a_bettor, amount)?;
            }
            Instruction::PostResult { value } => {
                accounts::expect_len(accounts, 3)?;
                let a_admin = &accounts[0];
                let a_slab = &accounts[1];
                let a_clock = &accounts[2];

                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);
                require_admin(&config, a_admin)?;

                let clock = Clock::from_account_info(a_clock)?;

                let game = zc::game_mut(&mut data)?;
                game.insert_result(value, clock.unix_timestamp)
                    .map_err(map_game_error)?;

                msg!("result posted");
                sol_log_64(game.round_id, value, game.result_rank, 0, 0);
            }
            Instruction::SeedWindow => {
                accounts::expect_len(accounts, 2)?;
                let a_admin = &accounts[0];
                let a_slab = &accounts[1];

                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);
                require_admin(&config, a_admin)?;

                let game = zc::game_mut(&mut data)?;
                game.seed_window().map_err(map_game_error)?;

                msg!("window seeded");
                sol_log_64(
                    game.window_left,
                    game.window_right,
                    game.window_left_value,
                    game.window_right_value,
                    0,
                );
            }
            Instruction::ShiftWindow { max_steps } => {
                accounts::expect_len(accounts, 2)?;
                let a_admin = &accounts[0];
                let a_slab = &accounts[1];

                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);
                require_admin(&config, a_admin)?;

                let game = zc::game_mut(&mut data)?;
                let done = game.shift_window(max_steps).map_err(map_game_error)?;

                if done {
                    msg!("window settled");
                } else {
                    msg!("window shift continues");
                }
                sol_log_64(
                    game.window_left,
                    game.window_right,
                    game.window_left_value,
                    game.window_right_value,
                    done as u64,
                );
            }
            Instruction::SettleWinners { start, stop } => {
                accounts::expect_len(accounts, 6)?;
                let a_admin = &accounts[0];
                let a_slab = &accounts[1];
                let a_vault = &accounts[2];
                let a_dividend = &accounts[3];
                let a_vault_pda = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);
                require_admin(&config, a_admin)?;

                let (auth, _) = accounts::derive_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_pda, &auth)?;
                verify_vault(
                    a_vault,
                    &auth,
                    &Pubkey::new_from_array(config.stake_mint),
                    &Pubkey::new_from_array(config.vault_pubkey),
                )?;
                accounts::expect_key(
                    a_dividend,
                    &Pubkey::new_from_array(config.dividend_pubkey),
                )?;

                let game = zc::game_mut(&mut data)?;
                let finalized = game.settle_winners(start, stop).map_err(map_game_error)?;

                match finalized {
                    Some(fee) => {
                        msg!("round finalized");
                        sol_log_64(game.winners_stake_sum, game.prize_pool, fee, 0, 0);
                        // the fee transfer is the last action of the call;
                        // a CPI failure rolls the settlement back whole
                        if fee > 0 {
                            let bump_arr: [u8; 1] = [config.vault_authority_bump];
                            let seeds: [&[u8]; 3] = [b"vault", a_slab.key.as_ref(), &bump_arr];
                            let signer_seeds: [&[&[u8]]; 1] = [&seeds];
                            vault::pay_out(
                                a_token,
                                a_vault,
                                a_dividend,
                                a_vault_pda,
                                fee,
                                &signer_seeds,
                            )?;
                        }
                    }
                    None => {
                        msg!("winners sum continues");
                        sol_log_64(game.winners_cursor, game.winners_stake_sum, 0, 0, 0);
                    }
                }
            }
            Instruction::ClaimPrize { user } => {
                accounts::expect_len(accounts, 6)?;
                let a_caller = &accounts[0];
                let a_slab = &accounts[1];
                let a_vault = &accounts[2];
                let a_caller_ata = &accounts[3];
                let a_vault_pda = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_caller)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                let (auth, _) = accounts::derive_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_pda, &auth)?;
                verify_vault(
                    a_vault,
                    &auth,
                    &Pubkey::new_from_array(config.stake_mint),
                    &Pubkey::new_from_array(config.vault_pubkey),
                )?;
                // the payout lands in the calling signer's token account,
                // whichever user's ledger is being settled
                let tok = verify_token_account(
                    a_caller_ata,
                    &Pubkey::new_from_array(config.stake_mint),
                    SweepstakeError::InvalidClaimAta,
                )?;
                if tok.owner != *a_caller.key {
                    return Err(SweepstakeError::InvalidClaimAta.into());
                }

                let game = zc::game_mut(&mut data)?;
                let amount = game.claim_prize(user.to_bytes()).map_err(map_game_error)?;

                let bump_arr: [u8; 1] = [config.vault_authority_bump];
                let seeds: [&[u8]; 3] = [b"vault", a_slab.key.as_ref(), &bump_arr];
                let signer_seeds: [&[&[u8]]; 1] = [&seeds];
                vault::pay_out(
                    a_token,
                    a_vault,
                    a_caller_ata,
                    a_vault_pda,
                    amount,
                    &signer_seeds,
                )?;

                msg!("prize claimed");
                sol_log_64(game.round_id, amount, 0, 0, 0);
            }
            Instruction::SetDividend { dividend } => {
                accounts::expect_len(accounts, 3)?;
                let a_authority = &accounts[0];
                let a_slab = &accounts[1];
                let a_dividend = &accounts[2];

                accounts::expect_signer(a_authority)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;

                let header = state::read_header(&data);
                if Pubkey::new_from_array(header.authority) != *a_authority.key {
                    return Err(SweepstakeError::Unauthorized.into());
                }

                let mut config = state::read_config(&data);
                accounts::expect_key(a_dividend, &dividend)?;
                verify_token_account(
                    a_dividend,
                    &Pubkey::new_from_array(config.stake_mint),
                    SweepstakeError::InvalidDividendAta,
                )?;

                config.dividend_pubkey = dividend.to_bytes();
                state::write_config(&mut data, &config);
            }
        }
        Ok(())
    }
}

// 10. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint {
    use crate::processor;
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult, pubkey::Pubkey,
    };

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        processor::process_instruction(program_id, accounts, instruction_data)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::constants::{CONFIG_LEN, ENGINE_OFF, HEADER_LEN, MAGIC, SLAB_LEN, VERSION};
    use crate::engine::{Game, Stage};
    use crate::error::SweepstakeError;
    use crate::processor::process_instruction;
    use crate::state::{self, GameConfig, SlabHeader};
    use crate::zc;
    use alloc::{vec, vec::Vec};
    use memoffset::offset_of;
    use num_traits::FromPrimitive;
    use solana_program::{
        account_info::AccountInfo, clock::Clock, program_error::ProgramError,
        program_pack::Pack, pubkey::Pubkey,
    };
    use spl_token::state::{Account as TokenAccount, AccountState};

    const START_TIME: i64 = 0;
    const ROUND_STEP: i64 = 3600;
    const CLOSE_OFFSET: i64 = 600;
    // round 1 closes at 3000

    // --- Harness ---

    struct TestAccount {
        key: Pubkey,
        owner: Pubkey,
        lamports: u64,
        data: Vec<u8>,
        is_signer: bool,
        is_writable: bool,
    }

    impl TestAccount {
        fn new(key: Pubkey, owner: Pubkey, lamports: u64, data: Vec<u8>) -> Self {
            Self { key, owner, lamports, data, is_signer: false, is_writable: false }
        }
        fn signer(mut self) -> Self {
            self.is_signer = true;
            self
        }
        fn writable(mut self) -> Self {
            self.is_writable = true;
            self
        }

        fn to_info<'a>(&'a mut self) -> AccountInfo<'a> {
            AccountInfo::new(
                &self.key,
                self.is_signer,
                self.is_writable,
                &mut self.lamports,
                &mut self.data,
                &self.owner,
                false,
                0,
            )
        }
    }

    // --- Builders ---

    fn make_token_account(mint: Pubkey, owner: Pubkey, amount: u64) -> Vec<u8> {
        let mut data = vec![0u8; TokenAccount::LEN];
        let mut account = TokenAccount::default();
        account.mint = mint;
        account.owner = owner;
        account.amount = amount;
        account.state = AccountState::Initialized;
        TokenAccount::pack(account, &mut data).unwrap();
        data
    }

    fn make_clock(unix_timestamp: i64) -> Vec<u8> {
        let clock = Clock { unix_timestamp, ..Clock::default() };
        bincode::serialize(&clock).unwrap()
    }

    fn token_balance(acc: &TestAccount) -> u64 {
        TokenAccount::unpack(&acc.data).unwrap().amount
    }

    struct RoundFixture {
        program_id: Pubkey,
        authority: TestAccount,
        admin: TestAccount,
        slab: TestAccount,
        mint: TestAccount,
        vault: TestAccount,
        dividend: TestAccount,
        vault_pda_acc: TestAccount,
        token_prog: TestAccount,
        clock: TestAccount,
    }

    fn setup_round() -> RoundFixture {
        let program_id = Pubkey::new_unique();
        let slab_key = Pubkey::new_unique();
        let (vault_pda, _) =
            Pubkey::find_program_address(&[b"vault", slab_key.as_ref()], &program_id);
        let mint_key = Pubkey::new_unique();

        RoundFixture {
            program_id,
            authority: TestAccount::new(
                Pubkey::new_unique(),
                solana_program::system_program::id(),
                0,
                vec![],
            )
            .signer(),
            admin: TestAccount::new(
                Pubkey::new_unique(),
                solana_program::system_program::id(),
                0,
                vec![],
            )
            .signer(),
            slab: TestAccount::new(slab_key, program_id, 0, vec![0u8; SLAB_LEN]).writable(),
            mint: TestAccount::new(mint_key, solana_program::system_program::id(), 0, vec![]),
            vault: TestAccount::new(
                Pubkey::new_unique(),
                spl_token::ID,
                0,
                make_token_account(mint_key, vault_pda, 0),
            )
            .writable(),
            dividend: TestAccount::new(
                Pubkey::new_unique(),
                spl_token::ID,
                0,
                make_token_account(mint_key, Pubkey::new_unique(), 0),
            )
            .writable(),
            vault_pda_acc: TestAccount::new(
                vault_pda,
                solana_program::system_program::id(),
                0,
                vec![],
            ),
            token_prog: TestAccount::new(spl_token::ID, Pubkey::default(), 0, vec![]),
            clock: TestAccount::new(
                solana_program::sysvar::clock::id(),
                solana_program::sysvar::id(),
                0,
                make_clock(100),
            ),
        }
    }

    fn set_clock(f: &mut RoundFixture, unix_timestamp: i64) {
        f.clock.data = make_clock(unix_timestamp);
    }

    // --- Encoders ---

    fn encode_u32(val: u32, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    fn encode_u64(val: u64, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    fn encode_i64(val: i64, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&val.to_le_bytes());
    }
    fn encode_pubkey(val: &Pubkey, buf: &mut Vec<u8>) {
        buf.extend_from_slice(val.as_ref());
    }

    fn encode_init_round(admin: &Pubkey, round_id: u64) -> Vec<u8> {
        let mut data = vec![0u8];
        encode_u64(round_id, &mut data);
        encode_pubkey(admin, &mut data);
        encode_i64(START_TIME, &mut data);
        encode_i64(ROUND_STEP, &mut data);
        encode_i64(CLOSE_OFFSET, &mut data);
        data
    }

    fn encode_place_bet(round_id: u64, value: u64, amount: u64) -> Vec<u8> {
        let mut data = vec![1u8];
        encode_u64(round_id, &mut data);
        encode_u64(value, &mut data);
        encode_u64(amount, &mut data);
        data
    }

    fn encode_post_result(value: u64) -> Vec<u8> {
        let mut data = vec![2u8];
        encode_u64(value, &mut data);
        data
    }

    fn encode_shift(max_steps: u32) -> Vec<u8> {
        let mut data = vec![4u8];
        encode_u32(max_steps, &mut data);
        data
    }

    fn encode_settle(start: u64, stop: u64) -> Vec<u8> {
        let mut data = vec![5u8];
        encode_u64(start, &mut data);
        encode_u64(stop, &mut data);
        data
    }

    fn encode_claim(user: &Pubkey) -> Vec<u8> {
        let mut data = vec![6u8];
        encode_pubkey(user, &mut data);
        data
    }

    fn encode_set_dividend(dividend: &Pubkey) -> Vec<u8> {
        let mut data = vec![7u8];
        encode_pubkey(dividend, &mut data);
        data
    }

    // --- Drivers ---

    fn init_round(f: &mut RoundFixture) {
        let admin_key = f.admin.key;
        let data = encode_init_round(&admin_key, 1);
        let accs = vec![
            f.authority.to_info(),
            f.slab.to_info(),
            f.mint.to_info(),
            f.vault.to_info(),
            f.dividend.to_info(),
            f.clock.to_info(),
        ];
        process_instruction(&f.program_id, &accs, &data).unwrap();
    }

    fn new_bettor(f: &RoundFixture, balance: u64) -> (TestAccount, TestAccount) {
        let user = TestAccount::new(
            Pubkey::new_unique(),
            solana_program::system_program::id(),
            0,
            vec![],
        )
        .signer();
        let ata = TestAccount::new(
            Pubkey::new_unique(),
            spl_token::ID,
            0,
            make_token_account(f.mint.key, user.key, balance),
        )
        .writable();
        (user, ata)
    }

    fn place_bet(
        f: &mut RoundFixture,
        user: &mut TestAccount,
        ata: &mut TestAccount,
        round_id: u64,
        value: u64,
        amount: u64,
    ) -> Result<(), ProgramError> {
        let accs = vec![
            user.to_info(),
            f.slab.to_info(),
            ata.to_info(),
            f.vault.to_info(),
            f.token_prog.to_info(),
            f.clock.to_info(),
        ];
        process_instruction(&f.program_id, &accs, &encode_place_bet(round_id, value, amount))
    }

    fn post_result(f: &mut RoundFixture, value: u64) -> Result<(), ProgramError> {
        let accs = vec![f.admin.to_info(), f.slab.to_info(), f.clock.to_info()];
        process_instruction(&f.program_id, &accs, &encode_post_result(value))
    }

    fn seed_window(f: &mut RoundFixture) -> Result<(), ProgramError> {
        let accs = vec![f.admin.to_info(), f.slab.to_info()];
        process_instruction(&f.program_id, &accs, &vec![3u8])
    }

    fn shift_window(f: &mut RoundFixture, max_steps: u32) -> Result<(), ProgramError> {
        let accs = vec![f.admin.to_info(), f.slab.to_info()];
        process_instruction(&f.program_id, &accs, &encode_shift(max_steps))
    }

    fn settle_winners(f: &mut RoundFixture, start: u64, stop: u64) -> Result<(), ProgramError> {
        let accs = vec![
            f.admin.to_info(),
            f.slab.to_info(),
            f.vault.to_info(),
            f.dividend.to_info(),
            f.vault_pda_acc.to_info(),
            f.token_prog.to_info(),
        ];
        process_instruction(&f.program_id, &accs, &encode_settle(start, stop))
    }

    fn claim_prize(
        f: &mut RoundFixture,
        caller: &mut TestAccount,
        caller_ata: &mut TestAccount,
        user: &Pubkey,
    ) -> Result<(), ProgramError> {
        let accs = vec![
            caller.to_info(),
            f.slab.to_info(),
            f.vault.to_info(),
            caller_ata.to_info(),
            f.vault_pda_acc.to_info(),
            f.token_prog.to_info(),
        ];
        process_instruction(&f.program_id, &accs, &encode_claim(user))
    }

    fn game_ref(f: &RoundFixture) -> &Game {
        zc::game_ref(&f.slab.data).unwrap()
    }

    fn expect_custom(res: Result<(), ProgramError>, want: SweepstakeError) {
        match res {
            Err(ProgramError::Custom(code)) => {
                assert_eq!(SweepstakeError::from_u32(code), Some(want));
            }
            other => panic!("expected {:?}, got {:?}", want, other),
        }
    }

    // --- Tests ---

    #[test]
    fn test_slab_layout() {
        assert_eq!(HEADER_LEN, 64);
        assert_eq!(CONFIG_LEN, 160);
        assert_eq!(ENGINE_OFF % 8, 0);
        assert_eq!(SLAB_LEN, ENGINE_OFF + core::mem::size_of::<Game>());
        assert_eq!(offset_of!(SlabHeader, authority), 16);
        assert_eq!(offset_of!(GameConfig, start_time), 128);
        assert_eq!(offset_of!(Game, tree), 120);
        assert_eq!(core::mem::size_of::<Game>() % 8, 0);
    }

    #[test]
    fn test_init_round() {
        let mut f = setup_round();
        init_round(&mut f);

        let header = state::read_header(&f.slab.data);
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.version, VERSION);
        assert_eq!(Pubkey::new_from_array(header.authority), f.authority.key);

        let config = state::read_config(&f.slab.data);
        assert_eq!(Pubkey::new_from_array(config.admin), f.admin.key);
        assert_eq!(Pubkey::new_from_array(config.stake_mint), f.mint.key);

        let game = game_ref(&f);
        assert_eq!(game.round_id, 1);
        assert_eq!(game.close_time, 3000);
        assert_eq!(game.stage(), Stage::Open);
        assert_eq!(game.tree.count(), 0);
    }

    #[test]
    fn test_init_round_twice_fails() {
        let mut f = setup_round();
        init_round(&mut f);
        let admin_key = f.admin.key;
        let data = encode_init_round(&admin_key, 1);
        let accs = vec![
            f.authority.to_info(),
            f.slab.to_info(),
            f.mint.to_info(),
            f.vault.to_info(),
            f.dividend.to_info(),
            f.clock.to_info(),
        ];
        expect_custom(
            process_instruction(&f.program_id, &accs, &data),
            SweepstakeError::AlreadyInitialized,
        );
    }

    #[test]
    fn test_init_round_rejects_bad_schedule() {
        let mut f = setup_round();
        let admin_key = f.admin.key;
        let mut data = vec![0u8];
        encode_u64(1, &mut data);
        encode_pubkey(&admin_key, &mut data);
        encode_i64(START_TIME, &mut data);
        encode_i64(0, &mut data); // zero round step
        encode_i64(CLOSE_OFFSET, &mut data);
        let accs = vec![
            f.authority.to_info(),
            f.slab.to_info(),
            f.mint.to_info(),
            f.vault.to_info(),
            f.dividend.to_info(),
            f.clock.to_info(),
        ];
        expect_custom(
            process_instruction(&f.program_id, &accs, &data),
            SweepstakeError::InvalidSchedule,
        );
    }

    #[test]
    fn test_init_round_rejects_past_round() {
        let mut f = setup_round();
        set_clock(&mut f, 5000); // round 1 closed at 3000
        let admin_key = f.admin.key;
        let data = encode_init_round(&admin_key, 1);
        let accs = vec![
            f.authority.to_info(),
            f.slab.to_info(),
            f.mint.to_info(),
            f.vault.to_info(),
            f.dividend.to_info(),
            f.clock.to_info(),
        ];
        expect_custom(
            process_instruction(&f.program_id, &accs, &data),
            SweepstakeError::InvalidRoundId,
        );
    }

    #[test]
    fn test_place_bet_moves_stake() {
        let mut f = setup_round();
        init_round(&mut f);
        let (mut user, mut ata) = new_bettor(&f, 1_000);

        place_bet(&mut f, &mut user, &mut ata, 1, 42, 250).unwrap();

        assert_eq!(token_balance(&ata), 750);
        assert_eq!(token_balance(&f.vault), 250);

        let game = game_ref(&f);
        assert_eq!(game.total_amount, 250);
        assert_eq!(game.tree.count(), 1);
        assert_eq!(game.stake_of(&user.key.to_bytes(), 42), 250);
        let values: Vec<u64> = game.user_values(&user.key.to_bytes()).collect();
        assert_eq!(values, vec![42]);
    }

    #[test]
    fn test_place_bet_same_value_accumulates() {
        let mut f = setup_round();
        init_round(&mut f);
        let (mut user, mut ata) = new_bettor(&f, 1_000);

        place_bet(&mut f, &mut user, &mut ata, 1, 42, 100).unwrap();
        place_bet(&mut f, &mut user, &mut ata, 1, 42, 150).unwrap();

        let game = game_ref(&f);
        // one occurrence in the multiset, one ledger entry, summed stake
        assert_eq!(game.tree.count(), 1);
        assert_eq!(game.stake_of(&user.key.to_bytes(), 42), 250);
        assert_eq!(game.total_amount, 250);
    }

    #[test]
    fn test_place_bet_rejects_zero() {
        let mut f = setup_round();
        init_round(&mut f);
        let (mut user, mut ata) = new_bettor(&f, 1_000);

        expect_custom(
            place_bet(&mut f, &mut user, &mut ata, 1, 0, 100),
            SweepstakeError::GameZeroBetValue,
        );
        expect_custom(
            place_bet(&mut f, &mut user, &mut ata, 1, 42, 0),
            SweepstakeError::GameZeroStake,
        );
    }

    #[test]
    fn test_place_bet_after_close_fails() {
        let mut f = setup_round();
        init_round(&mut f);
        let (mut user, mut ata) = new_bettor(&f, 1_000);

        set_clock(&mut f, 3000);
        expect_custom(
            place_bet(&mut f, &mut user, &mut ata, 1, 42, 100),
            SweepstakeError::GameBetsClosed,
        );
    }

    #[test]
    fn test_place_bet_round_auto_resolution() {
        let mut f = setup_round();
        init_round(&mut f);
        let (mut user, mut ata) = new_bettor(&f, 1_000);

        // round id 0 resolves to the open round
        place_bet(&mut f, &mut user, &mut ata, 0, 42, 100).unwrap();

        // once round 1 closes, 0 resolves to round 2 and no longer matches
        set_clock(&mut f, 3100);
        expect_custom(
            place_bet(&mut f, &mut user, &mut ata, 0, 43, 100),
            SweepstakeError::RoundMismatch,
        );
    }

    #[test]
    fn test_post_result_requires_admin() {
        let mut f = setup_round();
        init_round(&mut f);
        set_clock(&mut f, 3000);

        let accs = vec![f.authority.to_info(), f.slab.to_info(), f.clock.to_info()];
        expect_custom(
            process_instruction(&f.program_id, &accs, &encode_post_result(30)),
            SweepstakeError::Unauthorized,
        );
    }

    #[test]
    fn test_post_result_before_close_fails() {
        let mut f = setup_round();
        init_round(&mut f);
        expect_custom(post_result(&mut f, 30), SweepstakeError::GameBetsStillOpen);
    }

    #[test]
    fn test_post_result_twice_fails() {
        let mut f = setup_round();
        init_round(&mut f);
        set_clock(&mut f, 3000);
        post_result(&mut f, 30).unwrap();
        expect_custom(post_result(&mut f, 31), SweepstakeError::GameInvalidStage);
    }

    #[test]
    fn test_seed_before_result_fails() {
        let mut f = setup_round();
        init_round(&mut f);
        expect_custom(seed_window(&mut f), SweepstakeError::GameInvalidStage);
    }

    #[test]
    fn test_lifecycle_tie_round() {
        let mut f = setup_round();
        init_round(&mut f);

        let mut bettors: Vec<(TestAccount, TestAccount)> =
            [10u64, 20, 40, 50].iter().map(|_| new_bettor(&f, 1_000)).collect();
        for (i, value) in [10u64, 20, 40, 50].iter().enumerate() {
            let (user, ata) = &mut bettors[i];
            place_bet(&mut f, user, ata, 1, *value, 100).unwrap();
        }
        assert_eq!(token_balance(&f.vault), 400);

        set_clock(&mut f, 3000);
        post_result(&mut f, 30).unwrap();
        seed_window(&mut f).unwrap();
        {
            let game = game_ref(&f);
            // equidistant neighbours: both 20 and 40 win
            assert_eq!(game.window_left_value, 20);
            assert_eq!(game.window_right_value, 40);
            assert_eq!(game.window_left, 1);
            assert_eq!(game.window_right, 3);
        }

        shift_window(&mut f, 0).unwrap();
        assert_eq!(game_ref(&f).stage(), Stage::WindowShifted);

        settle_winners(&mut f, 0, 0).unwrap();
        {
            let game = game_ref(&f);
            assert_eq!(game.stage(), Stage::Finalized);
            assert_eq!(game.winners_stake_sum, 200);
            assert_eq!(game.fee_amount, 20); // 10% of the losing 200
            assert_eq!(game.prize_pool, 180);
        }
        assert_eq!(token_balance(&f.dividend), 20);
        assert_eq!(token_balance(&f.vault), 380);

        // winners split the pool pro-rata; here evenly
        for i in [1usize, 2] {
            let user_key = bettors[i].0.key;
            let (user, ata) = &mut bettors[i];
            claim_prize(&mut f, user, ata, &user_key).unwrap();
        }
        assert_eq!(token_balance(&bettors[1].1), 900 + 90);
        assert_eq!(token_balance(&bettors[2].1), 900 + 90);
        assert_eq!(token_balance(&f.vault), 200);

        // losers have nothing to claim
        let loser_key = bettors[0].0.key;
        let (loser, loser_ata) = &mut bettors[0];
        expect_custom(
            claim_prize(&mut f, loser, loser_ata, &loser_key),
            SweepstakeError::GameNothingToClaim,
        );

        // and a second claim is refused
        let winner_key = bettors[1].0.key;
        let (winner, winner_ata) = &mut bettors[1];
        expect_custom(
            claim_prize(&mut f, winner, winner_ata, &winner_key),
            SweepstakeError::GameAlreadyClaimed,
        );
    }

    #[test]
    fn test_settle_winners_in_chunks() {
        let mut f = setup_round();
        init_round(&mut f);

        let mut bettors: Vec<(TestAccount, TestAccount)> =
            [10u64, 20, 40, 50].iter().map(|_| new_bettor(&f, 1_000)).collect();
        for (i, value) in [10u64, 20, 40, 50].iter().enumerate() {
            let (user, ata) = &mut bettors[i];
            place_bet(&mut f, user, ata, 1, *value, 100).unwrap();
        }
        set_clock(&mut f, 3000);
        post_result(&mut f, 30).unwrap();
        seed_window(&mut f).unwrap();
        shift_window(&mut f, 0).unwrap();

        // stop short of the right bound: partial sum, not finalized
        settle_winners(&mut f, 0, 1).unwrap();
        {
            let game = game_ref(&f);
            assert_eq!(game.stage(), Stage::WindowShifted);
            assert_eq!(game.winners_stake_sum, 100);
        }
        assert_eq!(token_balance(&f.dividend), 0);

        // resume from the cursor and run to the right bound
        settle_winners(&mut f, 0, 0).unwrap();
        let game = game_ref(&f);
        assert_eq!(game.stage(), Stage::Finalized);
        assert_eq!(game.winners_stake_sum, 200);
        assert_eq!(token_balance(&f.dividend), 20);
    }

    #[test]
    fn test_claim_pays_caller_not_named_user() {
        let mut f = setup_round();
        init_round(&mut f);

        let mut bettors: Vec<(TestAccount, TestAccount)> =
            [10u64, 20, 40, 50].iter().map(|_| new_bettor(&f, 1_000)).collect();
        for (i, value) in [10u64, 20, 40, 50].iter().enumerate() {
            let (user, ata) = &mut bettors[i];
            place_bet(&mut f, user, ata, 1, *value, 100).unwrap();
        }
        set_clock(&mut f, 3000);
        post_result(&mut f, 30).unwrap();
        seed_window(&mut f).unwrap();
        shift_window(&mut f, 0).unwrap();
        settle_winners(&mut f, 0, 0).unwrap();

        // a third party settles the winner's ledger; the tokens land in
        // the third party's own account
        let (mut mallory, mut mallory_ata) = new_bettor(&f, 0);
        let winner_key = bettors[1].0.key;
        claim_prize(&mut f, &mut mallory, &mut mallory_ata, &winner_key).unwrap();
        assert_eq!(token_balance(&mallory_ata), 90);
        assert_eq!(token_balance(&bettors[1].1), 900);

        // the named user's prize is spent
        let (winner, winner_ata) = &mut bettors[1];
        expect_custom(
            claim_prize(&mut f, winner, winner_ata, &winner_key),
            SweepstakeError::GameAlreadyClaimed,
        );
    }

    #[test]
    fn test_claim_requires_callers_own_ata() {
        let mut f = setup_round();
        init_round(&mut f);

        let mut bettors: Vec<(TestAccount, TestAccount)> =
            [10u64, 20, 40, 50].iter().map(|_| new_bettor(&f, 1_000)).collect();
        for (i, value) in [10u64, 20, 40, 50].iter().enumerate() {
            let (user, ata) = &mut bettors[i];
            place_bet(&mut f, user, ata, 1, *value, 100).unwrap();
        }
        set_clock(&mut f, 3000);
        post_result(&mut f, 30).unwrap();
        seed_window(&mut f).unwrap();
        shift_window(&mut f, 0).unwrap();
        settle_winners(&mut f, 0, 0).unwrap();

        // caller passing someone else's token account is refused
        let (mut mallory, _) = new_bettor(&f, 0);
        let winner_key = bettors[1].0.key;
        let accs = vec![
            mallory.to_info(),
            f.slab.to_info(),
            f.vault.to_info(),
            bettors[1].1.to_info(),
            f.vault_pda_acc.to_info(),
            f.token_prog.to_info(),
        ];
        expect_custom(
            process_instruction(&f.program_id, &accs, &encode_claim(&winner_key)),
            SweepstakeError::InvalidClaimAta,
        );
    }

    #[test]
    fn test_set_dividend_requires_authority() {
        let mut f = setup_round();
        init_round(&mut f);

        let other_sink = TestAccount::new(
            Pubkey::new_unique(),
            spl_token::ID,
            0,
            make_token_account(f.mint.key, Pubkey::new_unique(), 0),
        );
        let mut other_sink = other_sink;
        let sink_key = other_sink.key;

        // the settlement admin is not the round authority
        let accs = vec![f.admin.to_info(), f.slab.to_info(), other_sink.to_info()];
        expect_custom(
            process_instruction(&f.program_id, &accs, &encode_set_dividend(&sink_key)),
            SweepstakeError::Unauthorized,
        );

        let accs = vec![f.authority.to_info(), f.slab.to_info(), other_sink.to_info()];
        process_instruction(&f.program_id, &accs, &encode_set_dividend(&sink_key)).unwrap();
        let config = state::read_config(&f.slab.data);
        assert_eq!(Pubkey::new_from_array(config.dividend_pubkey), sink_key);
    }

    #[test]
    fn test_uninitialized_slab_rejected() {
        let mut f = setup_round();
        let (mut user, mut ata) = new_bettor(&f, 1_000);
        expect_custom(
            place_bet(&mut f, &mut user, &mut ata, 1, 42, 100),
            SweepstakeError::NotInitialized,
        );
    }
}
